//! Shared chain data types exchanged between the gateway and the core
//!
//! Amounts are minor units held as `u128` and serialized as decimal strings,
//! since token supplies routinely exceed what a JSON number can carry.

use crate::errors::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

pub type NetworkId = String;

// =============================================================================
// BALANCES
// =============================================================================

/// Balance of one token, invariant `total = locked + available`
///
/// Fields are private so that the invariant can only be established through
/// the checked constructors (deserialization goes through them as well).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TokenBalanceWire", into = "TokenBalanceWire")]
pub struct TokenBalance {
    token_id: String,
    total_balance: u128,
    locked_balance: u128,
    available_balance: u128,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalanceWire {
    token_id: String,
    #[serde_as(as = "DisplayFromStr")]
    total_balance: u128,
    #[serde_as(as = "DisplayFromStr")]
    locked_balance: u128,
    #[serde_as(as = "Option<DisplayFromStr>")]
    available_balance: Option<u128>,
}

impl TryFrom<TokenBalanceWire> for TokenBalance {
    type Error = SyncError;

    fn try_from(wire: TokenBalanceWire) -> SyncResult<Self> {
        let balance = TokenBalance::new(wire.token_id, wire.total_balance, wire.locked_balance)?;
        match wire.available_balance {
            Some(available) if available != balance.available_balance => Err(SyncError::malformed(
                "token balance",
                format!(
                    "available {} does not match total {} - locked {}",
                    available, balance.total_balance, balance.locked_balance
                ),
            )),
            _ => Ok(balance),
        }
    }
}

impl From<TokenBalance> for TokenBalanceWire {
    fn from(balance: TokenBalance) -> Self {
        TokenBalanceWire {
            token_id: balance.token_id,
            total_balance: balance.total_balance,
            locked_balance: balance.locked_balance,
            available_balance: Some(balance.available_balance),
        }
    }
}

impl TokenBalance {
    /// Build from total and locked amounts; locked may not exceed total
    pub fn new(token_id: impl Into<String>, total: u128, locked: u128) -> SyncResult<Self> {
        let token_id = token_id.into();
        let available = total.checked_sub(locked).ok_or_else(|| {
            SyncError::malformed(
                "token balance",
                format!("locked {} exceeds total {} for {}", locked, total, token_id),
            )
        })?;
        Ok(Self {
            token_id,
            total_balance: total,
            locked_balance: locked,
            available_balance: available,
        })
    }

    pub fn zero(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            total_balance: 0,
            locked_balance: 0,
            available_balance: 0,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn total(&self) -> u128 {
        self.total_balance
    }

    pub fn locked(&self) -> u128 {
        self.locked_balance
    }

    pub fn available(&self) -> u128 {
        self.available_balance
    }

    pub fn is_zero(&self) -> bool {
        self.total_balance == 0
    }

    /// Add another balance of the same token component-wise
    pub fn merge(&mut self, other: &TokenBalance) -> SyncResult<()> {
        if other.token_id != self.token_id {
            return Err(SyncError::InvalidState(format!(
                "cannot merge balance of {} into {}",
                other.token_id, self.token_id
            )));
        }
        let overflow =
            || SyncError::malformed("token balance", format!("overflow summing {}", self.token_id));
        let locked = self
            .locked_balance
            .checked_add(other.locked_balance)
            .ok_or_else(overflow)?;
        let available = self
            .available_balance
            .checked_add(other.available_balance)
            .ok_or_else(overflow)?;
        let total = locked.checked_add(available).ok_or_else(overflow)?;

        self.locked_balance = locked;
        self.available_balance = available;
        self.total_balance = total;
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.locked_balance.checked_add(self.available_balance) == Some(self.total_balance)
    }
}

// =============================================================================
// TOKENS & PRICES
// =============================================================================

/// On-chain interface standard reported by the node for a token id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStandard {
    Fungible,
    NonFungible,
    NonStandard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub symbol: String,
    pub currency: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Confirmed transaction as listed by the explorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub hash: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub input_addresses: Vec<String>,
    #[serde(default)]
    pub output_addresses: Vec<String>,
}

impl TransactionSummary {
    /// Every address appearing on either side, deduplicated, in first-seen order
    pub fn touched_addresses(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for address in self.input_addresses.iter().chain(self.output_addresses.iter()) {
            if !seen.contains(address) {
                seen.push(address.clone());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressActivity {
    pub used: bool,
    #[serde(default)]
    pub latest_transaction: Option<TransactionSummary>,
}

/// Chain-side view of a transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "transaction", rename_all = "kebab-case")]
pub enum TransactionStatus {
    Pending,
    Mempooled,
    Confirmed(TransactionSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub tx_hash: String,
    #[serde(default)]
    pub from_group: Option<u8>,
    #[serde(default)]
    pub to_group: Option<u8>,
}
