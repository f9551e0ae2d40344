//! Durable per-wallet state
//!
//! Everything stored here is scoped by wallet id. Saving replaces the
//! wallet's previous rows; loading never looks at another wallet's rows.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::addresses::Address;
use crate::balances::HiddenTokens;
use crate::cache::CacheSnapshot;
use crate::errors::SyncResult;
use crate::pending::PendingTransaction;
use async_trait::async_trait;

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn save_snapshot(&self, wallet_id: &str, snapshot: &CacheSnapshot) -> SyncResult<()>;

    /// Empty snapshot when nothing was saved for the wallet
    async fn load_snapshot(&self, wallet_id: &str) -> SyncResult<CacheSnapshot>;

    async fn save_pending(&self, wallet_id: &str, pending: &[PendingTransaction]) -> SyncResult<()>;

    async fn load_pending(&self, wallet_id: &str) -> SyncResult<Vec<PendingTransaction>>;

    async fn save_addresses(&self, wallet_id: &str, addresses: &[Address]) -> SyncResult<()>;

    /// Addresses in derivation index order
    async fn load_addresses(&self, wallet_id: &str) -> SyncResult<Vec<Address>>;

    async fn save_hidden_tokens(&self, wallet_id: &str, hidden: &HiddenTokens) -> SyncResult<()>;

    async fn load_hidden_tokens(&self, wallet_id: &str) -> SyncResult<HiddenTokens>;

    /// Drop every row belonging to the wallet
    async fn forget_wallet(&self, wallet_id: &str) -> SyncResult<()>;
}
