//! Cache keys and invalidation patterns
//!
//! A key is the query name plus its parameters. Its stable string form
//! (`kind:param1:param2`) names the node in logs and persisted snapshots.
//! Parameters are percent-escaped so a `:` inside one survives the round trip.

use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Balance,
    TokenBalances,
    LatestTransaction,
    Transactions,
    TokenType,
    TokenMetadata,
    Price,
}

impl QueryKind {
    pub const ALL: [QueryKind; 7] = [
        QueryKind::Balance,
        QueryKind::TokenBalances,
        QueryKind::LatestTransaction,
        QueryKind::Transactions,
        QueryKind::TokenType,
        QueryKind::TokenMetadata,
        QueryKind::Price,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Balance => "balance",
            QueryKind::TokenBalances => "token_balances",
            QueryKind::LatestTransaction => "latest_transaction",
            QueryKind::Transactions => "transactions",
            QueryKind::TokenType => "token_type",
            QueryKind::TokenMetadata => "token_metadata",
            QueryKind::Price => "price",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }

    /// Kinds whose first parameter is an address hash
    pub fn is_address_scoped(&self) -> bool {
        matches!(
            self,
            QueryKind::Balance
                | QueryKind::TokenBalances
                | QueryKind::LatestTransaction
                | QueryKind::Transactions
        )
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: QueryKind,
    pub params: Vec<String>,
}

impl CacheKey {
    pub fn new(kind: QueryKind, params: Vec<String>) -> Self {
        Self { kind, params }
    }

    pub fn balance(address: &str, network: &str) -> Self {
        Self::new(QueryKind::Balance, vec![address.to_string(), network.to_string()])
    }

    pub fn token_balances(address: &str, network: &str) -> Self {
        Self::new(QueryKind::TokenBalances, vec![address.to_string(), network.to_string()])
    }

    pub fn latest_transaction(address: &str, network: &str) -> Self {
        Self::new(QueryKind::LatestTransaction, vec![address.to_string(), network.to_string()])
    }

    pub fn transactions(address: &str, network: &str) -> Self {
        Self::new(QueryKind::Transactions, vec![address.to_string(), network.to_string()])
    }

    pub fn token_type(token_id: &str, network: &str) -> Self {
        Self::new(QueryKind::TokenType, vec![token_id.to_string(), network.to_string()])
    }

    pub fn token_metadata(token_id: &str, network: &str) -> Self {
        Self::new(QueryKind::TokenMetadata, vec![token_id.to_string(), network.to_string()])
    }

    pub fn price(symbol: &str, currency: &str) -> Self {
        Self::new(QueryKind::Price, vec![symbol.to_string(), currency.to_string()])
    }

    /// Address hash this key belongs to, for address-scoped kinds
    pub fn address(&self) -> Option<&str> {
        if self.kind.is_address_scoped() {
            self.params.first().map(String::as_str)
        } else {
            None
        }
    }

    pub fn to_stable_string(&self) -> String {
        let mut out = String::from(self.kind.as_str());
        for param in &self.params {
            out.push(':');
            escape_param(param, &mut out);
        }
        out
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        let mut parts = s.split(':');
        let kind = parts
            .next()
            .and_then(QueryKind::parse)
            .ok_or_else(|| SyncError::persistence(format!("unknown cache key kind in '{}'", s)))?;
        let params = parts
            .map(|part| {
                unescape_param(part).ok_or_else(|| {
                    SyncError::persistence(format!("bad escape in cache key '{}'", s))
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;
        Ok(Self::new(kind, params))
    }
}

fn escape_param(param: &str, out: &mut String) {
    for c in param.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
}

fn unescape_param(part: &str) -> Option<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let code = rest.get(at + 1..at + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(':'),
            _ => return None,
        }
        rest = &rest[at + 3..];
    }
    out.push_str(rest);
    Some(out)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_stable_string())
    }
}

/// Selection of nodes for `invalidate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    All,
    Exact(CacheKey),
    Kind(QueryKind),
    /// Every address-scoped node of one address
    Address(String),
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Kind(kind) => key.kind == *kind,
            KeyPattern::Address(address) => key.address() == Some(address.as_str()),
        }
    }
}
