use crate::types::{TransactionStatus, TransactionSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// Lifecycle of a submitted transaction; ordering follows the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingStatus {
    Sent,
    Mempooled,
    Confirmed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Sent => "sent",
            PendingStatus::Mempooled => "mempooled",
            PendingStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(PendingStatus::Sent),
            "mempooled" => Some(PendingStatus::Mempooled),
            "confirmed" => Some(PendingStatus::Confirmed),
            _ => None,
        }
    }
}

impl From<&TransactionStatus> for PendingStatus {
    fn from(status: &TransactionStatus) -> Self {
        match status {
            TransactionStatus::Pending => PendingStatus::Sent,
            TransactionStatus::Mempooled => PendingStatus::Mempooled,
            TransactionStatus::Confirmed(_) => PendingStatus::Confirmed,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    pub token_id: String,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u128,
}

/// What the caller knows about a transaction before it has a hash
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub from_address: String,
    #[serde(default)]
    pub to_address: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u128,
    #[serde(default)]
    pub tokens: Vec<TokenAmount>,
}

impl TransactionDraft {
    pub fn into_pending(self, hash: impl Into<String>) -> PendingTransaction {
        PendingTransaction {
            hash: hash.into(),
            from_address: self.from_address,
            to_address: self.to_address,
            amount: self.amount,
            tokens: self.tokens,
            status: PendingStatus::Sent,
            submitted_at: Utc::now(),
            last_checked_at: None,
            confirmed: None,
            last_error: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub hash: String,
    pub from_address: String,
    #[serde(default)]
    pub to_address: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u128,
    #[serde(default)]
    pub tokens: Vec<TokenAmount>,
    pub status: PendingStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Chain record, present once confirmed
    #[serde(default)]
    pub confirmed: Option<TransactionSummary>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingTransaction {
    /// Apply an observed chain status
    ///
    /// Returns `true` when the status moved forward. Observations behind the
    /// current status are ignored, so the status never regresses.
    pub fn advance(&mut self, observed: &TransactionStatus) -> bool {
        self.last_checked_at = Some(Utc::now());
        let next = PendingStatus::from(observed);
        if next <= self.status {
            return false;
        }
        self.status = next;
        self.last_error = None;
        if let TransactionStatus::Confirmed(summary) = observed {
            self.confirmed = Some(summary.clone());
        }
        true
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PendingStatus::Confirmed
    }

    /// Addresses named by the transaction itself or its chain record
    pub fn involved_addresses(&self) -> Vec<String> {
        let mut addresses = vec![self.from_address.clone()];
        addresses.extend(self.to_address.clone());
        if let Some(summary) = &self.confirmed {
            addresses.extend(summary.touched_addresses());
        }
        let mut seen = Vec::with_capacity(addresses.len());
        for address in addresses {
            if !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }
}
