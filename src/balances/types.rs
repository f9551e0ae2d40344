use crate::errors::SyncError;
use crate::types::{TokenBalance, TokenMetadata};
use serde::{Deserialize, Serialize};

/// Exactly one classification per token id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "metadata", rename_all = "kebab-case")]
pub enum TokenClassification {
    ListedFungible(TokenMetadata),
    UnlistedFungible(TokenMetadata),
    NonFungible(TokenMetadata),
    NonStandard,
}

impl TokenClassification {
    pub fn metadata(&self) -> Option<&TokenMetadata> {
        match self {
            TokenClassification::ListedFungible(m)
            | TokenClassification::UnlistedFungible(m)
            | TokenClassification::NonFungible(m) => Some(m),
            TokenClassification::NonStandard => None,
        }
    }

    pub fn is_listed(&self) -> bool {
        matches!(self, TokenClassification::ListedFungible(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedToken {
    pub token_id: String,
    pub balance: TokenBalance,
    pub classification: TokenClassification,
    /// Fiat worth; `None` means unknown, which is not the same as zero
    pub worth: Option<f64>,
}

impl AggregatedToken {
    /// Display name, falling back to the token id
    pub fn name(&self) -> &str {
        self.classification
            .metadata()
            .map(|m| m.name.as_str())
            .unwrap_or(&self.token_id)
    }
}

/// Wallet balances split by token class, each list in its display order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBalances {
    pub listed_fts: Vec<AggregatedToken>,
    pub unlisted_fts: Vec<AggregatedToken>,
    pub nfts: Vec<AggregatedToken>,
    pub non_standard: Vec<AggregatedToken>,
    pub is_loading: bool,
    pub has_error: bool,
    #[serde(skip)]
    pub errors: Vec<SyncError>,
}

impl AggregatedBalances {
    pub fn all_tokens(&self) -> impl Iterator<Item = &AggregatedToken> {
        self.listed_fts
            .iter()
            .chain(self.unlisted_fts.iter())
            .chain(self.nfts.iter())
            .chain(self.non_standard.iter())
    }

    pub fn token_count(&self) -> usize {
        self.listed_fts.len() + self.unlisted_fts.len() + self.nfts.len() + self.non_standard.len()
    }

    /// Sum of known worths across listed tokens; `None` when none is known
    pub fn total_worth(&self) -> Option<f64> {
        self.listed_fts
            .iter()
            .filter_map(|t| t.worth)
            .fold(None, |acc, w| Some(acc.unwrap_or(0.0) + w))
    }
}
