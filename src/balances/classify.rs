//! Offline token listing and user-hidden tokens
use crate::config::NativeTokenConfig;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use crate::types::TokenMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Curated metadata for known tokens; the native coin is always present
#[derive(Debug, Clone)]
pub struct ListingIndex {
    native_id: String,
    tokens: HashMap<String, TokenMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingFile {
    Plain(Vec<TokenMetadata>),
    Wrapped { tokens: Vec<TokenMetadata> },
}

impl ListingIndex {
    pub fn new(native: &NativeTokenConfig) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(
            native.token_id.clone(),
            TokenMetadata {
                id: native.token_id.clone(),
                name: native.name.clone(),
                symbol: native.symbol.clone(),
                decimals: native.decimals,
                logo_uri: None,
            },
        );
        Self {
            native_id: native.token_id.clone(),
            tokens,
        }
    }

    /// Add listed tokens; an entry for the native id is ignored
    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = TokenMetadata>) -> Self {
        for token in tokens {
            if token.id != self.native_id {
                self.tokens.insert(token.id.clone(), token);
            }
        }
        self
    }

    /// Parse a token list, either a bare array or `{"tokens": [...]}`
    pub fn from_json_str(json: &str, native: &NativeTokenConfig) -> SyncResult<Self> {
        let tokens = match serde_json::from_str::<ListingFile>(json)? {
            ListingFile::Plain(tokens) | ListingFile::Wrapped { tokens } => tokens,
        };
        Ok(Self::new(native).with_tokens(tokens))
    }

    pub fn from_json_file(path: impl AsRef<Path>, native: &NativeTokenConfig) -> SyncResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::configuration(format!(
                "Failed to read token list '{}': {}",
                path.display(),
                e
            ))
        })?;
        let index = Self::from_json_str(&contents, native)?;
        logger::info(
            LogTag::Balances,
            &format!("Loaded {} listed tokens from {}", index.len(), path.display()),
        );
        Ok(index)
    }

    pub fn get(&self, token_id: &str) -> Option<&TokenMetadata> {
        self.tokens.get(token_id)
    }

    pub fn is_listed(&self, token_id: &str) -> bool {
        self.tokens.contains_key(token_id)
    }

    pub fn native_id(&self) -> &str {
        &self.native_id
    }

    pub fn native(&self) -> Option<&TokenMetadata> {
        self.tokens.get(&self.native_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Token ids the user chose to hide
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenTokens {
    ids: BTreeSet<String>,
}

impl HiddenTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(&mut self, token_id: impl Into<String>) -> bool {
        self.ids.insert(token_id.into())
    }

    pub fn unhide(&mut self, token_id: &str) -> bool {
        self.ids.remove(token_id)
    }

    pub fn is_hidden(&self, token_id: &str) -> bool {
        self.ids.contains(token_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for HiddenTokens {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
