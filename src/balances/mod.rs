//! Balance aggregation
//!
//! Per address, the native balance node and the paged token balance node are
//! merged into one list; per wallet, the address lists are merged again.
//! Every token is then classified: the offline listing decides first, and
//! only tokens missing from it cost an on-chain type lookup, cached forever
//! under `token_type:<id>:<network>`.
//!
//! Aggregation never fails as a whole. Nodes that errored are reported
//! through `has_error` while whatever did resolve is still returned.

pub mod classify;
pub mod sort;
pub mod types;

#[cfg(test)]
mod tests;

pub use classify::{HiddenTokens, ListingIndex};
pub use types::{AggregatedBalances, AggregatedToken, TokenClassification};

use crate::cache::{combine, combine_partial, CacheKey, Node, NodeStatus, QueryCache, QueryOptions};
use crate::config::GatewayConfig;
use crate::errors::{PermanentError, SyncError, SyncResult};
use crate::gateway::{fetch_all_pages, ChainGateway};
use crate::logger::{self, LogTag};
use crate::types::{TokenBalance, TokenMetadata, TokenStandard};
use crate::worth::WorthCalculator;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Paging parameters for token balance lists
#[derive(Debug, Clone, Copy)]
struct Paging {
    page_size: u32,
    window: u32,
    max_pages: u32,
}

#[derive(Clone)]
pub struct BalanceAggregator {
    cache: QueryCache,
    gateway: Arc<dyn ChainGateway>,
    listing: Arc<ListingIndex>,
    worth: WorthCalculator,
    paging: Paging,
}

impl BalanceAggregator {
    pub fn new(
        cache: QueryCache,
        gateway: Arc<dyn ChainGateway>,
        listing: Arc<ListingIndex>,
        worth: WorthCalculator,
        gateway_config: &GatewayConfig,
    ) -> Self {
        Self {
            cache,
            gateway,
            listing,
            worth,
            paging: Paging {
                page_size: gateway_config.page_size,
                window: gateway_config.page_window,
                max_pages: gateway_config.max_pages,
            },
        }
    }

    // -------------------------------------------------------------------------
    // balance nodes
    // -------------------------------------------------------------------------

    /// Native coin balance of one address
    pub async fn native_balance(&self, address: &str, network: &str) -> Node<TokenBalance> {
        let gateway = Arc::clone(&self.gateway);
        let (address_owned, network_owned) = (address.to_string(), network.to_string());

        self.cache
            .get(
                CacheKey::balance(address, network),
                self.cache.default_options(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (address, network) = (address_owned.clone(), network_owned.clone());
                    async move { gateway.get_balance(&address, &network).await }
                },
            )
            .await
    }

    /// All non-native token balances of one address, every page in page order
    pub async fn token_balances(&self, address: &str, network: &str) -> Node<Vec<TokenBalance>> {
        let gateway = Arc::clone(&self.gateway);
        let (address_owned, network_owned) = (address.to_string(), network.to_string());
        let paging = self.paging;

        self.cache
            .get(
                CacheKey::token_balances(address, network),
                self.cache.default_options(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (address, network) = (address_owned.clone(), network_owned.clone());
                    async move {
                        fetch_all_pages(paging.page_size, paging.window, paging.max_pages, |page| {
                            let gateway = Arc::clone(&gateway);
                            let (address, network) = (address.clone(), network.clone());
                            async move {
                                gateway
                                    .get_token_balances_page(
                                        &address,
                                        &network,
                                        page,
                                        paging.page_size,
                                    )
                                    .await
                            }
                        })
                        .await
                    }
                },
            )
            .await
    }

    /// Native and token balances of one address merged into one list
    pub async fn address_balances(&self, address: &str, network: &str) -> Node<Vec<TokenBalance>> {
        let (native, tokens) = tokio::join!(
            self.native_balance(address, network),
            self.token_balances(address, network)
        );
        let parts = vec![native.map(|b| vec![b]), tokens];
        flatten(combine(&parts, |lists| merge_balances(lists.into_iter().flatten())))
    }

    /// Balances of every address merged per token
    ///
    /// Addresses that are still loading or failed do not hold back the
    /// others; the node keeps its loading and error flags meanwhile.
    pub async fn wallet_balances(
        &self,
        addresses: &[String],
        network: &str,
    ) -> Node<Vec<TokenBalance>> {
        if addresses.is_empty() {
            return Node::ready(None, Vec::new());
        }
        let per_address =
            join_all(addresses.iter().map(|a| self.address_balances(a, network))).await;
        flatten(combine_partial(&per_address, |lists| {
            merge_balances(lists.into_iter().flatten().flatten())
        }))
    }

    // -------------------------------------------------------------------------
    // classification
    // -------------------------------------------------------------------------

    /// Classify a token id; listed tokens never touch the network
    pub async fn classify(&self, token_id: &str, network: &str) -> Node<TokenClassification> {
        if let Some(metadata) = self.listing.get(token_id) {
            return Node::ready(None, TokenClassification::ListedFungible(metadata.clone()));
        }

        let standard = self.token_type(token_id, network).await;
        let Some(kind) = standard.value else {
            return standard.map(|_| TokenClassification::NonStandard);
        };

        match kind {
            TokenStandard::NonStandard => Node::ready(None, TokenClassification::NonStandard),
            TokenStandard::Fungible | TokenStandard::NonFungible => {
                let metadata = self.token_metadata(token_id, network).await;
                let (meta, error) = match (metadata.value, metadata.error) {
                    (Some(meta), _) => (meta, None),
                    (None, Some(SyncError::Permanent(PermanentError::NotFound { .. }))) => {
                        (unknown_metadata(token_id), None)
                    }
                    (None, error) => (unknown_metadata(token_id), error),
                };
                let classification = if kind == TokenStandard::Fungible {
                    TokenClassification::UnlistedFungible(meta)
                } else {
                    TokenClassification::NonFungible(meta)
                };
                let mut node = Node::ready(None, classification);
                if error.is_some() {
                    node.status = NodeStatus::Error;
                    node.error = error;
                }
                node
            }
        }
    }

    async fn token_type(&self, token_id: &str, network: &str) -> Node<TokenStandard> {
        let gateway = Arc::clone(&self.gateway);
        let (token_owned, network_owned) = (token_id.to_string(), network.to_string());

        self.cache
            .get(
                CacheKey::token_type(token_id, network),
                self.never_stale(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (token_id, network) = (token_owned.clone(), network_owned.clone());
                    async move { gateway.get_token_type(&token_id, &network).await }
                },
            )
            .await
    }

    async fn token_metadata(&self, token_id: &str, network: &str) -> Node<TokenMetadata> {
        let gateway = Arc::clone(&self.gateway);
        let (token_owned, network_owned) = (token_id.to_string(), network.to_string());

        self.cache
            .get(
                CacheKey::token_metadata(token_id, network),
                self.never_stale(),
                move || {
                    let gateway = Arc::clone(&gateway);
                    let (token_id, network) = (token_owned.clone(), network_owned.clone());
                    async move { gateway.get_token_metadata(&token_id, &network).await }
                },
            )
            .await
    }

    fn never_stale(&self) -> QueryOptions {
        self.cache.default_options().never_stale()
    }

    // -------------------------------------------------------------------------
    // aggregation
    // -------------------------------------------------------------------------

    /// Classified, filtered and sorted wallet balances
    pub async fn aggregate(
        &self,
        addresses: &[String],
        network: &str,
        hidden: &HiddenTokens,
        include_hidden: bool,
    ) -> AggregatedBalances {
        let merged = self.wallet_balances(addresses, network).await;
        let mut out = AggregatedBalances {
            is_loading: merged.is_loading(),
            has_error: merged.has_error(),
            ..AggregatedBalances::default()
        };
        out.errors.extend(merged.error.clone());

        let balances: Vec<TokenBalance> = merged
            .value
            .unwrap_or_default()
            .into_iter()
            .filter(|b| !b.is_zero() || b.token_id() == self.listing.native_id())
            .filter(|b| include_hidden || !hidden.is_hidden(b.token_id()))
            .collect();

        let classifications =
            join_all(balances.iter().map(|b| self.classify(b.token_id(), network))).await;

        for (balance, classification) in balances.into_iter().zip(classifications) {
            if let Some(err) = classification.error.clone() {
                out.has_error = true;
                out.errors.push(err);
            }
            let Some(classification) = classification.value else {
                logger::debug(
                    LogTag::Balances,
                    &format!("Omitting {}: type lookup did not resolve", balance.token_id()),
                );
                continue;
            };

            let worth = match &classification {
                TokenClassification::ListedFungible(meta) => {
                    self.worth
                        .worth(balance.token_id(), balance.total(), meta.decimals)
                        .await
                }
                _ => None,
            };
            let token = AggregatedToken {
                token_id: balance.token_id().to_string(),
                balance,
                classification,
                worth,
            };
            match &token.classification {
                TokenClassification::ListedFungible(_) => out.listed_fts.push(token),
                TokenClassification::UnlistedFungible(_) => out.unlisted_fts.push(token),
                TokenClassification::NonFungible(_) => out.nfts.push(token),
                TokenClassification::NonStandard => out.non_standard.push(token),
            }
        }

        sort::sort_listed(&mut out.listed_fts);
        sort::sort_by_name(&mut out.unlisted_fts);
        sort::sort_by_name(&mut out.nfts);
        sort::sort_by_id(&mut out.non_standard);

        logger::debug(
            LogTag::Balances,
            &format!(
                "Aggregated {} addresses: {} listed, {} unlisted, {} nfts, {} non-standard{}{}",
                addresses.len(),
                out.listed_fts.len(),
                out.unlisted_fts.len(),
                out.nfts.len(),
                out.non_standard.len(),
                if out.is_loading { " (loading)" } else { "" },
                if out.has_error { " (with errors)" } else { "" }
            ),
        );
        out
    }
}

/// Merge balances of the same token, ordered by token id
pub fn merge_balances<'a>(
    balances: impl IntoIterator<Item = &'a TokenBalance>,
) -> SyncResult<Vec<TokenBalance>> {
    let mut merged: BTreeMap<String, TokenBalance> = BTreeMap::new();
    for balance in balances {
        match merged.get_mut(balance.token_id()) {
            Some(existing) => existing.merge(balance)?,
            None => {
                merged.insert(balance.token_id().to_string(), balance.clone());
            }
        }
    }
    Ok(merged.into_values().collect())
}

/// Move a combiner failure into the node's error state
fn flatten<W>(node: Node<SyncResult<W>>) -> Node<W> {
    let Node {
        key,
        status,
        value,
        error,
        is_refreshing,
        is_stale,
        last_fetched_at,
    } = node;
    let (value, error, status) = match value {
        Some(Ok(v)) => (Some(v), error, status),
        Some(Err(e)) => (None, Some(e), NodeStatus::Error),
        None => (None, error, status),
    };
    Node {
        key,
        status,
        value,
        error,
        is_refreshing,
        is_stale,
        last_fetched_at,
    }
}

fn unknown_metadata(token_id: &str) -> TokenMetadata {
    TokenMetadata {
        id: token_id.to_string(),
        name: token_id.to_string(),
        symbol: String::new(),
        decimals: 0,
        logo_uri: None,
    }
}
