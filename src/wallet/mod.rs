//! Wallet context
//!
//! One `WalletContext` exists per unlocked wallet. It owns the query cache,
//! the address book, the pending reconciler and the discovery worker, and it
//! is the only entry point the surrounding application calls. Unlocking
//! builds it (restoring persisted state for that wallet id only); locking
//! persists, stops every background task and clears the cache.


use crate::addresses::{
    Address, AddressBook, AddressDeriver, AddressSettings, Ed25519Deriver, WalletSeed,
};
use crate::balances::{AggregatedBalances, BalanceAggregator, HiddenTokens, ListingIndex};
use crate::cache::{CacheKey, CacheStats, KeyPattern, Node, NodeSubscription, QueryCache};
use crate::config::{validate_config, Config};
use crate::discovery::{DiscoveryEngine, DiscoveryHandle, DiscoveryReport, DiscoveryRequest};
use crate::errors::{SyncError, SyncResult};
use crate::gateway::{fetch_all_pages, ChainGateway, ExponentialBackoff, HttpGateway};
use crate::logger::{self, LogTag};
use crate::pending::{PendingReconciler, PendingTransaction, TransactionDraft};
use crate::persistence::{SqliteStore, WalletStore};
use crate::types::{TokenBalance, TransactionSummary};
use crate::worth::WorthCalculator;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every wallet of the process
#[derive(Clone)]
pub struct WalletDeps {
    pub gateway: Arc<dyn ChainGateway>,
    pub deriver: Arc<dyn AddressDeriver>,
    pub listing: Arc<ListingIndex>,
    pub store: Option<Arc<dyn WalletStore>>,
}

impl WalletDeps {
    /// Production collaborators: HTTP gateway, ed25519 deriver, SQLite store
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        let gateway = HttpGateway::new(&config.gateway, &config.native)?;
        let listing = match &config.persistence.token_list_path {
            Some(path) => ListingIndex::from_json_file(path, &config.native)?,
            None => ListingIndex::new(&config.native),
        };
        let store: Option<Arc<dyn WalletStore>> = if config.persistence.enabled {
            Some(Arc::new(SqliteStore::from_config(&config.persistence)?))
        } else {
            None
        };
        Ok(Self {
            gateway: Arc::new(gateway),
            deriver: Arc::new(Ed25519Deriver::new(config.discovery.group_count)),
            listing: Arc::new(listing),
            store,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateTarget {
    Address(String),
    All,
}

pub struct WalletContext {
    wallet_id: String,
    seed: WalletSeed,
    config: Config,
    deps: WalletDeps,
    network: RwLock<String>,
    retry: ExponentialBackoff,
    cache: QueryCache,
    book: Arc<RwLock<AddressBook>>,
    hidden: RwLock<HiddenTokens>,
    worth: WorthCalculator,
    aggregator: BalanceAggregator,
    pending: PendingReconciler,
    discovery: Mutex<DiscoveryHandle>,
    shutdown: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WalletContext {
    /// Build the context for one wallet and restore its persisted state
    pub async fn unlock(
        wallet_id: impl Into<String>,
        seed: WalletSeed,
        config: Config,
        deps: WalletDeps,
    ) -> SyncResult<Self> {
        validate_config(&config)?;
        let wallet_id = wallet_id.into();
        let network = config.gateway.network_id.clone();
        let retry = ExponentialBackoff::from_config(&config.retry);
        let cache = QueryCache::new(&config.cache, retry.clone());
        let shutdown = Arc::new(Notify::new());

        let (book, hidden, pending_txs) = match &deps.store {
            Some(store) => {
                let book = AddressBook::from_addresses(store.load_addresses(&wallet_id).await?)?;
                let restored = cache.restore(&store.load_snapshot(&wallet_id).await?);
                logger::debug(
                    LogTag::Wallet,
                    &format!("Restored {} cache nodes for {}", restored, wallet_id),
                );
                (
                    book,
                    store.load_hidden_tokens(&wallet_id).await?,
                    store.load_pending(&wallet_id).await?,
                )
            }
            None => (AddressBook::new(), HiddenTokens::new(), Vec::new()),
        };

        let book = Arc::new(RwLock::new(book));
        {
            let mut book = book.write();
            if book.is_empty() {
                let first = deps.deriver.derive(&seed, 0);
                book.insert_discovered(std::slice::from_ref(&first))?;
            }
        }

        let worth = WorthCalculator::new(
            cache.clone(),
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.listing),
            retry.clone(),
            config.pricing.currency.clone(),
            Duration::from_millis(config.cache.price_stale_ms),
        );
        let aggregator = BalanceAggregator::new(
            cache.clone(),
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.listing),
            worth.clone(),
            &config.gateway,
        );
        let pending = PendingReconciler::new(
            Arc::clone(&deps.gateway),
            cache.clone(),
            Arc::clone(&book),
            config.pending.clone(),
        );

        let gc = cache.spawn_gc(
            Duration::from_millis(config.cache.gc_interval_ms.max(1)),
            Arc::clone(&shutdown),
        );
        let (discovery, worker) = DiscoveryHandle::spawn(
            DiscoveryEngine::new(
                Arc::clone(&deps.gateway),
                Arc::clone(&deps.deriver),
                retry.clone(),
                network.clone(),
            ),
            Arc::clone(&shutdown),
        );

        let resumed = pending_txs.into_iter().filter(|tx| pending.track(tx.clone())).count();

        logger::info(
            LogTag::Wallet,
            &format!(
                "Unlocked wallet {} on {} ({} addresses, {} pending transactions)",
                wallet_id,
                network,
                book.read().len(),
                resumed
            ),
        );

        Ok(Self {
            wallet_id,
            seed,
            config,
            deps,
            network: RwLock::new(network),
            retry,
            cache,
            book,
            hidden: RwLock::new(hidden),
            worth,
            aggregator,
            pending,
            discovery: Mutex::new(discovery),
            shutdown,
            tasks: Mutex::new(vec![gc, worker]),
        })
    }

    /// Persist, stop background work and drop every cached node
    pub async fn lock(self) -> SyncResult<()> {
        let persisted = self.persist().await;

        self.pending.stop().await;
        self.shutdown.notify_waiters();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
                logger::warning(LogTag::Wallet, "Background task did not stop in time");
            }
        }
        self.cache.clear();

        logger::info(LogTag::Wallet, &format!("Locked wallet {}", self.wallet_id));
        persisted
    }

    /// Write snapshot, pending set, addresses and hidden tokens to the store
    pub async fn persist(&self) -> SyncResult<()> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        store.save_snapshot(&self.wallet_id, &self.cache.snapshot()).await?;
        store.save_pending(&self.wallet_id, &self.pending.pending()).await?;
        store.save_addresses(&self.wallet_id, &self.addresses()).await?;
        let hidden = self.hidden.read().clone();
        store.save_hidden_tokens(&self.wallet_id, &hidden).await?;
        logger::debug(LogTag::Persistence, &format!("Persisted wallet {}", self.wallet_id));
        Ok(())
    }

    /// Move to another network; nothing cached for the old one survives
    pub fn switch_network(&self, network: impl Into<String>) {
        let network = network.into();
        if *self.network.read() == network {
            return;
        }
        self.cache.clear();
        *self.network.write() = network.clone();

        let (handle, worker) = DiscoveryHandle::spawn(
            DiscoveryEngine::new(
                Arc::clone(&self.deps.gateway),
                Arc::clone(&self.deps.deriver),
                self.retry.clone(),
                network.clone(),
            ),
            Arc::clone(&self.shutdown),
        );
        *self.discovery.lock() = handle;
        let mut tasks = self.tasks.lock();
        // workers of earlier networks exit once their handle is gone
        tasks.retain(|task| !task.is_finished());
        tasks.push(worker);
        drop(tasks);

        logger::info(LogTag::Wallet, &format!("Switched {} to {}", self.wallet_id, network));
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn network(&self) -> String {
        self.network.read().clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[cfg(test)]
    fn background_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    // -------------------------------------------------------------------------
    // addresses
    // -------------------------------------------------------------------------

    pub fn addresses(&self) -> Vec<Address> {
        self.book.read().addresses()
    }

    pub fn address_hashes(&self) -> Vec<String> {
        self.book.read().hashes()
    }

    /// Scan for used addresses and add the contiguous prefix to the book
    ///
    /// Indices already in the book are skipped along with `skip_indexes`.
    pub async fn discover_addresses(
        &self,
        skip_indexes: BTreeSet<u32>,
    ) -> SyncResult<DiscoveryReport> {
        let mut skip = skip_indexes;
        skip.extend(self.book.read().used_indices());
        let request = DiscoveryRequest::from_config(&self.config.discovery, skip);

        let handle = self.discovery.lock().clone();
        let report = handle.discover(self.seed.clone(), request).await?;

        let added = self.book.write().insert_discovered(&report.used_addresses)?;
        if let Some(err) = &report.error {
            logger::warning(
                LogTag::Discovery,
                &format!("Discovery for {} incomplete: {}", self.wallet_id, err),
            );
        }
        logger::info(
            LogTag::Discovery,
            &format!(
                "Discovery for {}: {} new addresses, highest contiguous index {:?}",
                self.wallet_id, added, report.result.highest_contiguous_index
            ),
        );

        if added > 0 {
            if let Some(store) = &self.deps.store {
                store.save_addresses(&self.wallet_id, &self.addresses()).await?;
            }
        }
        Ok(report)
    }

    /// Derive the next unused address, optionally in a given group
    pub async fn add_address(&self, group: Option<u8>) -> SyncResult<Address> {
        let address = self
            .book
            .write()
            .add_user_address(self.deps.deriver.as_ref(), &self.seed, group)?;
        logger::info(
            LogTag::Wallet,
            &format!("Added address {} (index {})", address.hash, address.derivation_index),
        );
        if let Some(store) = &self.deps.store {
            store.save_addresses(&self.wallet_id, &self.addresses()).await?;
        }
        Ok(address)
    }

    pub fn update_address_settings(&self, hash: &str, settings: AddressSettings) -> SyncResult<()> {
        self.book.write().update_settings(hash, settings)
    }

    // -------------------------------------------------------------------------
    // balances & worth
    // -------------------------------------------------------------------------

    pub async fn get_wallet_balances(&self, include_hidden: bool) -> AggregatedBalances {
        let addresses = self.address_hashes();
        let network = self.network();
        let hidden = self.hidden.read().clone();
        self.aggregator
            .aggregate(&addresses, &network, &hidden, include_hidden)
            .await
    }

    pub async fn address_balances(&self, hash: &str) -> SyncResult<Node<Vec<TokenBalance>>> {
        self.ensure_owned(hash)?;
        Ok(self.aggregator.address_balances(hash, &self.network()).await)
    }

    /// Total fiat worth of the wallet; `None` when nothing has a price
    pub async fn get_wallet_worth(&self) -> Option<f64> {
        let balances = self
            .aggregator
            .wallet_balances(&self.address_hashes(), &self.network())
            .await;
        let balances = balances.value.unwrap_or_default();
        self.worth.wallet_worth(&balances).await
    }

    pub fn hide_token(&self, token_id: impl Into<String>) -> bool {
        self.hidden.write().hide(token_id)
    }

    pub fn unhide_token(&self, token_id: &str) -> bool {
        self.hidden.write().unhide(token_id)
    }

    /// Keep every address's balance nodes alive and eagerly refreshed
    pub fn watch_balances(&self) -> Vec<NodeSubscription> {
        let network = self.network();
        self.address_hashes()
            .iter()
            .flat_map(|hash| {
                [
                    self.cache.subscribe(CacheKey::balance(hash, &network)),
                    self.cache.subscribe(CacheKey::token_balances(hash, &network)),
                ]
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // transactions
    // -------------------------------------------------------------------------

    pub async fn latest_transaction(
        &self,
        hash: &str,
    ) -> SyncResult<Node<Option<TransactionSummary>>> {
        self.ensure_owned(hash)?;
        let network = self.network();
        let gateway = Arc::clone(&self.deps.gateway);
        let (address, net) = (hash.to_string(), network.clone());

        Ok(self
            .cache
            .get(
                CacheKey::latest_transaction(hash, &network),
                self.cache.default_options(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (address, network) = (address.clone(), net.clone());
                    async move {
                        let activity = gateway.get_address_activity(&address, &network).await?;
                        Ok(activity.latest_transaction)
                    }
                },
            )
            .await)
    }

    /// Confirmed transactions of an address, newest first, all pages
    pub async fn transactions(&self, hash: &str) -> SyncResult<Node<Vec<TransactionSummary>>> {
        self.ensure_owned(hash)?;
        let network = self.network();
        let gateway = Arc::clone(&self.deps.gateway);
        let (address, net) = (hash.to_string(), network.clone());
        let paging = self.config.gateway.clone();

        Ok(self
            .cache
            .get(
                CacheKey::transactions(hash, &network),
                self.cache.default_options(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (address, network) = (address.clone(), net.clone());
                    let (page_size, window, max_pages) =
                        (paging.page_size, paging.page_window, paging.max_pages);
                    async move {
                        fetch_all_pages(page_size, window, max_pages, |page| {
                            let gateway = Arc::clone(&gateway);
                            let (address, network) = (address.clone(), network.clone());
                            async move {
                                gateway
                                    .get_transactions_page(&address, &network, page, page_size)
                                    .await
                            }
                        })
                        .await
                    }
                },
            )
            .await)
    }

    /// Start tracking a transaction submitted elsewhere
    pub fn track_submitted_transaction(&self, tx: PendingTransaction) -> bool {
        self.pending.track(tx)
    }

    pub async fn submit_transaction(
        &self,
        unsigned_tx: &str,
        signature: &str,
        draft: TransactionDraft,
    ) -> SyncResult<PendingTransaction> {
        self.ensure_owned(&draft.from_address)?;
        self.pending.submit_and_track(unsigned_tx, signature, draft).await
    }

    pub fn pending_transactions(&self) -> Vec<PendingTransaction> {
        self.pending.pending()
    }

    // -------------------------------------------------------------------------
    // invalidation
    // -------------------------------------------------------------------------

    /// Mark cached state stale; returns the number of affected nodes
    pub fn invalidate(&self, target: InvalidateTarget) -> usize {
        let pattern = match target {
            InvalidateTarget::Address(hash) => KeyPattern::Address(hash),
            InvalidateTarget::All => KeyPattern::All,
        };
        self.cache.invalidate(&pattern)
    }

    fn ensure_owned(&self, hash: &str) -> SyncResult<()> {
        if self.book.read().contains(hash) {
            Ok(())
        } else {
            Err(SyncError::InvalidState(format!(
                "address {} does not belong to wallet {}",
                hash, self.wallet_id
            )))
        }
    }
}
