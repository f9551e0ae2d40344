//! Configuration schemas - every section defined once with its defaults

use crate::config_struct;

// ============================================================================
// CHAIN GATEWAY
// ============================================================================

config_struct! {
    /// Explorer and full-node endpoints plus request size ceilings
    pub struct GatewayConfig {
        explorer_url: String = "http://127.0.0.1:9090".to_string(),
        node_url: String = "http://127.0.0.1:12973".to_string(),
        network_id: String = "mainnet".to_string(),
        /// Optional API key sent as `X-API-KEY`
        api_key: Option<String> = None,
        request_timeout_ms: u64 = 10_000,

        // Query-size ceilings; larger requests are split into sequential sub-batches
        max_addresses_per_request: usize = 80,
        max_tokens_per_request: usize = 80,
        page_size: u32 = 100,
        max_pages: u32 = 100,
        /// Pages requested concurrently while paging through a list
        page_window: u32 = 4,
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

config_struct! {
    /// HD address discovery parameters
    pub struct DiscoveryConfig {
        /// Consecutive inactive indices that end a scan
        gap_limit: u32 = 20,
        /// Indices queried per batch
        batch_size: u32 = 10,
        /// Group count used by the default address deriver
        group_count: u8 = 4,
    }
}

// ============================================================================
// QUERY CACHE
// ============================================================================

config_struct! {
    /// Staleness and garbage collection windows for cache nodes
    pub struct CacheConfig {
        stale_ms: u64 = 30_000,
        gc_ms: u64 = 300_000,
        gc_interval_ms: u64 = 60_000,
        price_stale_ms: u64 = 60_000,
    }
}

// ============================================================================
// RETRY
// ============================================================================

config_struct! {
    /// Capped exponential backoff for transient gateway failures
    pub struct RetryConfig {
        base_delay_ms: u64 = 200,
        multiplier: f64 = 2.0,
        max_delay_ms: u64 = 10_000,
        /// Total attempts including the first one
        max_attempts: u32 = 4,
        /// Fraction of the delay added as random jitter (0.0 - 0.5)
        jitter: f64 = 0.1,
    }
}

// ============================================================================
// PENDING TRANSACTIONS
// ============================================================================

config_struct! {
    /// Polling cadence for submitted transactions
    pub struct PendingConfig {
        poll_interval_ms: u64 = 4_000,
        max_poll_interval_ms: u64 = 30_000,
    }
}

// ============================================================================
// PRICING & NATIVE COIN
// ============================================================================

config_struct! {
    /// Fiat currency used for worth calculations
    pub struct PricingConfig {
        currency: String = "USD".to_string(),
    }
}

config_struct! {
    /// Metadata for the chain's native coin, which is always a listed token
    pub struct NativeTokenConfig {
        token_id: String = "0".repeat(64),
        symbol: String = "ALPH".to_string(),
        name: String = "Alephium".to_string(),
        decimals: u8 = 18,
    }
}

// ============================================================================
// PERSISTENCE & LOGGING
// ============================================================================

config_struct! {
    /// Per-wallet durable state (cache snapshots, pending transactions, addresses)
    pub struct PersistenceConfig {
        enabled: bool = true,
        database_path: String = "data/walletsync.db".to_string(),
        /// Optional offline token listing (JSON array of token metadata)
        token_list_path: Option<String> = None,
    }
}

config_struct! {
    /// Logger settings
    pub struct LoggingConfig {
        min_level: String = "info".to_string(),
        file_path: Option<String> = None,
        debug_tags: Vec<String> = Vec::new(),
        enabled_tags: Vec<String> = Vec::new(),
        console: bool = true,
    }
}

// ============================================================================
// ROOT
// ============================================================================

config_struct! {
    /// Complete configuration file layout
    pub struct Config {
        gateway: GatewayConfig = GatewayConfig::default(),
        discovery: DiscoveryConfig = DiscoveryConfig::default(),
        cache: CacheConfig = CacheConfig::default(),
        retry: RetryConfig = RetryConfig::default(),
        pending: PendingConfig = PendingConfig::default(),
        pricing: PricingConfig = PricingConfig::default(),
        native: NativeTokenConfig = NativeTokenConfig::default(),
        persistence: PersistenceConfig = PersistenceConfig::default(),
        logging: LoggingConfig = LoggingConfig::default(),
    }
}
