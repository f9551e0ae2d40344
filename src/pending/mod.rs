//! Pending transaction reconciler
//!
//! Every submitted transaction gets its own polling task. The task asks the
//! gateway for the hash's status, folds the answer into the tracked record
//! (`Sent -> Mempooled -> Confirmed`, never backwards) and stops after the
//! confirmation. A confirmation invalidates the cached state of every wallet
//! address the transaction touched and drops the record from the pending set.
//!
//! The poll interval doubles while nothing changes, up to
//! `max_poll_interval_ms`, and resets whenever the status moves.

pub mod types;


pub use types::{PendingStatus, PendingTransaction, TokenAmount, TransactionDraft};

use crate::addresses::AddressBook;
use crate::arguments::is_debug_pending_enabled;
use crate::cache::{KeyPattern, QueryCache};
use crate::config::PendingConfig;
use crate::errors::SyncResult;
use crate::gateway::ChainGateway;
use crate::logger::{self, LogTag};
use crate::types::TransactionStatus;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Effect of one status observation on the tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Status moved forward but is not final yet
    Advanced(PendingStatus),
    Unchanged,
    /// Confirmed; carries the number of invalidated cache nodes
    Confirmed(usize),
    /// The hash is not (or no longer) tracked
    Untracked,
}

struct ReconcilerInner {
    gateway: Arc<dyn ChainGateway>,
    cache: QueryCache,
    book: Arc<RwLock<AddressBook>>,
    config: PendingConfig,
    pending: Mutex<HashMap<String, PendingTransaction>>,
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    stopping: AtomicBool,
}

#[derive(Clone)]
pub struct PendingReconciler {
    inner: Arc<ReconcilerInner>,
}

impl PendingReconciler {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        cache: QueryCache,
        book: Arc<RwLock<AddressBook>>,
        config: PendingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                gateway,
                cache,
                book,
                config,
                pending: Mutex::new(HashMap::new()),
                pollers: Mutex::new(HashMap::new()),
                shutdown: Arc::new(Notify::new()),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Start tracking a transaction
    ///
    /// Tracking a hash twice keeps one record and one poller; the newer
    /// record can only move the status forward. Returns `true` for a new hash.
    pub fn track(&self, tx: PendingTransaction) -> bool {
        if tx.is_confirmed() {
            logger::debug(
                LogTag::Pending,
                &format!("Not tracking {}: already confirmed", tx.hash),
            );
            return false;
        }

        let hash = tx.hash.clone();
        let is_new = {
            let mut pending = self.inner.pending.lock();
            match pending.get_mut(&hash) {
                Some(existing) => {
                    if tx.status > existing.status {
                        existing.status = tx.status;
                    }
                    false
                }
                None => {
                    pending.insert(hash.clone(), tx);
                    true
                }
            }
        };

        if is_new {
            logger::info(LogTag::Pending, &format!("Tracking transaction {}", hash));
        }
        self.ensure_poller(&hash);
        is_new
    }

    /// Submit a signed transaction and track it once the gateway accepted it
    pub async fn submit_and_track(
        &self,
        unsigned_tx: &str,
        signature: &str,
        draft: TransactionDraft,
    ) -> SyncResult<PendingTransaction> {
        let result = self.inner.gateway.submit_transaction(unsigned_tx, signature).await?;
        logger::info(
            LogTag::Pending,
            &format!(
                "Submitted {} (groups {:?} -> {:?})",
                result.tx_hash, result.from_group, result.to_group
            ),
        );
        let tx = draft.into_pending(result.tx_hash);
        self.track(tx.clone());
        Ok(tx)
    }

    /// Fold one observed status into the tracked record
    pub fn apply(&self, hash: &str, observed: &TransactionStatus) -> Reconciled {
        self.inner.apply(hash, observed)
    }

    pub fn get(&self, hash: &str) -> Option<PendingTransaction> {
        self.inner.pending.lock().get(hash).cloned()
    }

    /// Tracked transactions, oldest submission first
    pub fn pending(&self) -> Vec<PendingTransaction> {
        let mut txs: Vec<PendingTransaction> =
            self.inner.pending.lock().values().cloned().collect();
        txs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.hash.cmp(&b.hash)));
        txs
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    pub fn is_polling(&self, hash: &str) -> bool {
        self.inner
            .pollers
            .lock()
            .get(hash)
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop every poller; tracked records stay in place
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();

        let handles: Vec<(String, JoinHandle<()>)> = self.inner.pollers.lock().drain().collect();
        for (hash, handle) in handles {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                logger::warning(
                    LogTag::Pending,
                    &format!("Poller for {} did not stop within {:?}", hash, STOP_TIMEOUT),
                );
            }
        }
        logger::debug(LogTag::Pending, "Pending reconciler stopped");
    }

    fn ensure_poller(&self, hash: &str) {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return;
        }
        let mut pollers = self.inner.pollers.lock();
        if pollers.get(hash).map_or(false, |h| !h.is_finished()) {
            return;
        }
        let handle = tokio::spawn(poll(Arc::clone(&self.inner), hash.to_string()));
        pollers.insert(hash.to_string(), handle);
    }
}

impl ReconcilerInner {
    fn apply(&self, hash: &str, observed: &TransactionStatus) -> Reconciled {
        let confirmed = {
            let mut pending = self.pending.lock();
            let Some(tx) = pending.get_mut(hash) else {
                return Reconciled::Untracked;
            };
            if !tx.advance(observed) {
                return Reconciled::Unchanged;
            }
            if !tx.is_confirmed() {
                logger::info(
                    LogTag::Pending,
                    &format!("Transaction {} is now {}", hash, tx.status.as_str()),
                );
                return Reconciled::Advanced(tx.status);
            }
            pending.remove(hash)
        };

        let Some(tx) = confirmed else {
            return Reconciled::Untracked;
        };
        let owned: Vec<String> = {
            let book = self.book.read();
            tx.involved_addresses()
                .into_iter()
                .filter(|address| book.contains(address))
                .collect()
        };
        let invalidated: usize = owned
            .iter()
            .map(|address| self.cache.invalidate(&KeyPattern::Address(address.clone())))
            .sum();

        logger::info(
            LogTag::Pending,
            &format!(
                "Transaction {} confirmed; refreshed {} wallet addresses ({} cache nodes)",
                hash,
                owned.len(),
                invalidated
            ),
        );
        Reconciled::Confirmed(invalidated)
    }

    fn record_error(&self, hash: &str, message: String) {
        if let Some(tx) = self.pending.lock().get_mut(hash) {
            tx.last_error = Some(message);
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        let max_ms = self.config.max_poll_interval_ms.max(self.config.poll_interval_ms);
        let max = Duration::from_millis(max_ms);
        current.saturating_mul(2).min(max)
    }
}

async fn poll(inner: Arc<ReconcilerInner>, hash: String) {
    let base = Duration::from_millis(inner.config.poll_interval_ms.max(1));
    let mut interval = base;

    loop {
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = inner.shutdown.notified() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match inner.gateway.get_transaction_status(&hash).await {
            Ok(status) => match inner.apply(&hash, &status) {
                Reconciled::Confirmed(_) | Reconciled::Untracked => break,
                Reconciled::Advanced(_) => interval = base,
                Reconciled::Unchanged => {
                    interval = inner.next_interval(interval);
                    if is_debug_pending_enabled() {
                        logger::debug(
                            LogTag::Pending,
                            &format!("{} unchanged, next poll in {:?}", hash, interval),
                        );
                    }
                }
            },
            Err(e) if e.is_retryable() => {
                logger::debug(LogTag::Pending, &format!("Status poll for {} failed: {}", hash, e));
                inner.record_error(&hash, e.to_string());
                interval = inner.next_interval(interval);
            }
            Err(e) => {
                logger::warning(
                    LogTag::Pending,
                    &format!("Giving up on status of {}: {}", hash, e),
                );
                inner.record_error(&hash, e.to_string());
                break;
            }
        }
    }
}
