//! Chain Gateway: stateless request/response access to the explorer and node
//!
//! Everything above this layer talks to the chain through [`ChainGateway`].
//! The production implementation is [`HttpGateway`]; tests use a scripted
//! in-memory gateway.

pub mod batching;
pub mod http;
pub mod retry;

pub use batching::{assemble_pages, fetch_all_pages, fetch_in_batches, split_batches};
pub use http::HttpGateway;
pub use retry::{with_retry, ExponentialBackoff};

use crate::errors::{PermanentError, SyncError, SyncResult};
use crate::types::{
    AddressActivity, SubmitResult, TokenBalance, TokenMetadata, TokenStandard, TransactionStatus,
    TransactionSummary,
};
use async_trait::async_trait;

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Native coin balance of an address
    async fn get_balance(&self, address: &str, network: &str) -> SyncResult<TokenBalance>;

    /// One page (1-based) of non-native token balances held by an address
    async fn get_token_balances_page(
        &self,
        address: &str,
        network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TokenBalance>>;

    /// Whether the address has any confirmed transaction, with the latest one if known
    async fn get_address_activity(
        &self,
        address: &str,
        network: &str,
    ) -> SyncResult<AddressActivity>;

    /// Whether each address has any confirmed transaction, in input order
    ///
    /// Implementations with a bulk endpoint split `addresses` at their
    /// address-count ceiling. Any failed lookup fails the whole call.
    async fn get_addresses_used(
        &self,
        addresses: &[String],
        network: &str,
    ) -> SyncResult<Vec<bool>> {
        let lookups = addresses
            .iter()
            .map(|address| self.get_address_activity(address, network));
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .map(|outcome| outcome.map(|activity| activity.used))
            .collect()
    }

    /// One page (1-based, newest first) of confirmed transactions touching an address
    async fn get_transactions_page(
        &self,
        address: &str,
        network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TransactionSummary>>;

    async fn get_token_type(&self, token_id: &str, network: &str) -> SyncResult<TokenStandard>;

    async fn get_token_metadata(&self, token_id: &str, network: &str) -> SyncResult<TokenMetadata>;

    async fn get_price(&self, symbol: &str, currency: &str) -> SyncResult<f64>;

    /// Prices for several symbols; symbols without a quote are omitted
    async fn get_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> SyncResult<Vec<(String, f64)>> {
        let mut prices = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_price(symbol, currency).await {
                Ok(price) => prices.push((symbol.clone(), price)),
                Err(SyncError::Permanent(PermanentError::NotFound { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(prices)
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> SyncResult<TransactionStatus>;

    async fn submit_transaction(
        &self,
        unsigned_tx: &str,
        signature: &str,
    ) -> SyncResult<SubmitResult>;
}
