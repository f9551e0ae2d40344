//! Scripted in-memory chain gateway for component tests
//!
//! State is set up through `with_*` calls, failures are injected per
//! `(method, argument)`, and every call is counted so tests can assert how
//! many requests actually reached the "network".

use crate::errors::{SyncError, SyncResult};
use crate::gateway::ChainGateway;
use crate::types::{
    AddressActivity, SubmitResult, TokenBalance, TokenMetadata, TokenStandard, TransactionStatus,
    TransactionSummary,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

pub(crate) const NATIVE_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Default)]
struct MockState {
    balances: HashMap<String, TokenBalance>,
    token_balances: HashMap<String, Vec<TokenBalance>>,
    active: HashSet<String>,
    transactions: HashMap<String, Vec<TransactionSummary>>,
    token_types: HashMap<String, TokenStandard>,
    metadata: HashMap<String, TokenMetadata>,
    prices: HashMap<String, f64>,
    statuses: HashMap<String, VecDeque<TransactionStatus>>,
    one_shot_failures: HashMap<String, VecDeque<SyncError>>,
    sticky_failures: HashMap<String, SyncError>,
    submitted: Vec<(String, String)>,
    next_tx_hash: Option<String>,
}

#[derive(Default)]
pub(crate) struct MockGateway {
    state: Mutex<MockState>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Mutex<Duration>,
}

fn call_key(method: &str, arg: &str) -> String {
    format!("{}:{}", method, arg)
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(&self, address: &str, total: u128, locked: u128) -> &Self {
        let balance = TokenBalance::new(NATIVE_ID, total, locked).expect("locked <= total");
        self.state.lock().balances.insert(address.to_string(), balance);
        self
    }

    pub fn with_token(&self, address: &str, token_id: &str, total: u128, locked: u128) -> &Self {
        let balance = TokenBalance::new(token_id, total, locked).expect("locked <= total");
        self.state
            .lock()
            .token_balances
            .entry(address.to_string())
            .or_default()
            .push(balance);
        self
    }

    pub fn with_active(&self, address: &str) -> &Self {
        self.state.lock().active.insert(address.to_string());
        self
    }

    pub fn with_transactions(&self, address: &str, txs: Vec<TransactionSummary>) -> &Self {
        let mut state = self.state.lock();
        state.active.insert(address.to_string());
        state.transactions.insert(address.to_string(), txs);
        drop(state);
        self
    }

    pub fn with_token_type(&self, token_id: &str, standard: TokenStandard) -> &Self {
        self.state.lock().token_types.insert(token_id.to_string(), standard);
        self
    }

    pub fn with_metadata(&self, token_id: &str, name: &str, symbol: &str, decimals: u8) -> &Self {
        self.state.lock().metadata.insert(
            token_id.to_string(),
            TokenMetadata {
                id: token_id.to_string(),
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals,
                logo_uri: None,
            },
        );
        self
    }

    pub fn with_price(&self, symbol: &str, price: f64) -> &Self {
        self.state.lock().prices.insert(symbol.to_string(), price);
        self
    }

    /// Statuses reported for a hash, one per poll; the last one repeats
    pub fn with_status_sequence(&self, tx_hash: &str, statuses: Vec<TransactionStatus>) -> &Self {
        self.state
            .lock()
            .statuses
            .insert(tx_hash.to_string(), statuses.into_iter().collect());
        self
    }

    pub fn with_next_tx_hash(&self, tx_hash: &str) -> &Self {
        self.state.lock().next_tx_hash = Some(tx_hash.to_string());
        self
    }

    /// Fail the next call of `method` for `arg` with `error`
    pub fn fail_once(&self, method: &str, arg: &str, error: SyncError) -> &Self {
        self.state
            .lock()
            .one_shot_failures
            .entry(call_key(method, arg))
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every call of `method` for `arg` with `error`
    pub fn fail_always(&self, method: &str, arg: &str, error: SyncError) -> &Self {
        self.state
            .lock()
            .sticky_failures
            .insert(call_key(method, arg), error);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Total calls of `method`
    pub fn calls(&self, method: &str) -> u32 {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Calls of `method` for one argument
    pub fn calls_for(&self, method: &str, arg: &str) -> u32 {
        self.calls
            .lock()
            .get(&call_key(method, arg))
            .copied()
            .unwrap_or(0)
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.state.lock().submitted.clone()
    }

    async fn enter(&self, method: &str, arg: &str) -> SyncResult<()> {
        {
            let mut calls = self.calls.lock();
            *calls.entry(method.to_string()).or_default() += 1;
            *calls.entry(call_key(method, arg)).or_default() += 1;
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let key = call_key(method, arg);
        if let Some(err) = state.one_shot_failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = state.sticky_failures.get(&key) {
            return Err(err.clone());
        }
        Ok(())
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, limit: u32) -> Vec<T> {
    let start = (page.saturating_sub(1) as usize) * limit as usize;
    let end = (start + limit as usize).min(items.len());
    items.get(start..end).map(<[T]>::to_vec).unwrap_or_default()
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn get_balance(&self, address: &str, _network: &str) -> SyncResult<TokenBalance> {
        self.enter("balance", address).await?;
        Ok(self
            .state
            .lock()
            .balances
            .get(address)
            .cloned()
            .unwrap_or_else(|| TokenBalance::zero(NATIVE_ID)))
    }

    async fn get_token_balances_page(
        &self,
        address: &str,
        _network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TokenBalance>> {
        self.enter("token_balances", address).await?;
        let state = self.state.lock();
        Ok(state
            .token_balances
            .get(address)
            .map(|items| page_of(items, page, limit))
            .unwrap_or_default())
    }

    async fn get_address_activity(
        &self,
        address: &str,
        _network: &str,
    ) -> SyncResult<AddressActivity> {
        self.enter("activity", address).await?;
        let state = self.state.lock();
        Ok(AddressActivity {
            used: state.active.contains(address),
            latest_transaction: state
                .transactions
                .get(address)
                .and_then(|txs| txs.first().cloned()),
        })
    }

    async fn get_transactions_page(
        &self,
        address: &str,
        _network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TransactionSummary>> {
        self.enter("transactions", address).await?;
        let state = self.state.lock();
        Ok(state
            .transactions
            .get(address)
            .map(|items| page_of(items, page, limit))
            .unwrap_or_default())
    }

    async fn get_token_type(&self, token_id: &str, _network: &str) -> SyncResult<TokenStandard> {
        self.enter("token_type", token_id).await?;
        Ok(self
            .state
            .lock()
            .token_types
            .get(token_id)
            .copied()
            .unwrap_or(TokenStandard::NonStandard))
    }

    async fn get_token_metadata(
        &self,
        token_id: &str,
        _network: &str,
    ) -> SyncResult<TokenMetadata> {
        self.enter("token_metadata", token_id).await?;
        self.state
            .lock()
            .metadata
            .get(token_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("metadata for {}", token_id)))
    }

    async fn get_price(&self, symbol: &str, _currency: &str) -> SyncResult<f64> {
        self.enter("price", symbol).await?;
        self.state
            .lock()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| SyncError::not_found(format!("price for {}", symbol)))
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> SyncResult<TransactionStatus> {
        self.enter("status", tx_hash).await?;
        let mut state = self.state.lock();
        let status = match state.statuses.get_mut(tx_hash) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(status.unwrap_or(TransactionStatus::Pending))
    }

    async fn submit_transaction(
        &self,
        unsigned_tx: &str,
        signature: &str,
    ) -> SyncResult<SubmitResult> {
        self.enter("submit", unsigned_tx).await?;
        let mut state = self.state.lock();
        state
            .submitted
            .push((unsigned_tx.to_string(), signature.to_string()));
        let tx_hash = state
            .next_tx_hash
            .take()
            .unwrap_or_else(|| format!("tx-{}", state.submitted.len()));
        Ok(SubmitResult {
            tx_hash,
            from_group: Some(0),
            to_group: Some(0),
        })
    }
}
