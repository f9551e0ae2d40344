//! reqwest-based gateway for an explorer REST API and a full-node REST API

use super::batching::fetch_in_batches;
use super::ChainGateway;
use crate::config::{GatewayConfig, NativeTokenConfig};
use crate::errors::{classify_status, SyncError, SyncResult};
use crate::logger::{self, LogTag};
use crate::types::{
    AddressActivity, SubmitResult, TokenBalance, TokenMetadata, TokenStandard, TransactionStatus,
    TransactionSummary,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::time::Duration;

pub struct HttpGateway {
    client: reqwest::Client,
    explorer_url: String,
    node_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    max_addresses_per_request: usize,
    max_tokens_per_request: usize,
    /// The explorer reports plain address balances without a token id
    native_token_id: String,
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    #[serde_as(as = "DisplayFromStr")]
    balance: u128,
    #[serde_as(as = "DisplayFromStr")]
    locked_balance: u128,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalanceResponse {
    token_id: String,
    #[serde_as(as = "DisplayFromStr")]
    balance: u128,
    #[serde_as(as = "DisplayFromStr")]
    locked_balance: u128,
}

#[derive(Debug, Deserialize)]
struct IoRef {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTransaction {
    hash: String,
    #[serde(default)]
    block_hash: Option<String>,
    timestamp: i64,
    #[serde(default)]
    inputs: Vec<IoRef>,
    #[serde(default)]
    outputs: Vec<IoRef>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ExplorerTransactionState {
    Accepted(ExplorerTransaction),
    Pending(ExplorerTransaction),
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    category: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    unsigned_tx: &'a str,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_id: String,
    #[serde(default)]
    from_group: Option<u8>,
    #[serde(default)]
    to_group: Option<u8>,
}

impl From<ExplorerTransaction> for TransactionSummary {
    fn from(tx: ExplorerTransaction) -> Self {
        let collect = |refs: Vec<IoRef>| -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for address in refs.into_iter().filter_map(|r| r.address) {
                if !out.contains(&address) {
                    out.push(address);
                }
            }
            out
        };
        TransactionSummary {
            hash: tx.hash,
            block_hash: tx.block_hash,
            timestamp_ms: tx.timestamp,
            input_addresses: collect(tx.inputs),
            output_addresses: collect(tx.outputs),
        }
    }
}

/// `Retry-After` in whole seconds, as milliseconds; HTTP dates are ignored
fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

fn parse_category(endpoint: &str, category: &str) -> SyncResult<TokenStandard> {
    match category {
        "fungible" => Ok(TokenStandard::Fungible),
        "non-fungible" => Ok(TokenStandard::NonFungible),
        "non-standard" => Ok(TokenStandard::NonStandard),
        other => Err(SyncError::malformed(
            endpoint,
            format!("unknown token category '{}'", other),
        )),
    }
}

// =============================================================================
// REQUEST PLUMBING
// =============================================================================

impl HttpGateway {
    pub fn new(config: &GatewayConfig, native: &NativeTokenConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SyncError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            explorer_url: config.explorer_url.trim_end_matches('/').to_string(),
            node_url: config.node_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: config.request_timeout_ms,
            max_addresses_per_request: config.max_addresses_per_request,
            max_tokens_per_request: config.max_tokens_per_request,
            native_token_id: native.token_id.clone(),
        })
    }

    fn explorer(&self, path: &str) -> String {
        format!("{}{}", self.explorer_url, path)
    }

    fn node(&self, path: &str) -> String {
        format!("{}{}", self.node_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        address: Option<&str>,
    ) -> SyncResult<reqwest::Response> {
        let request = match &self.api_key {
            Some(key) => request.header("X-API-KEY", key),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::timeout(url, self.timeout_ms)
            } else {
                SyncError::from(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        logger::debug(
            LogTag::Gateway,
            &format!("HTTP {} from {}", status.as_u16(), url),
        );
        Err(classify_status(url, status.as_u16(), retry_after_ms, address))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> SyncResult<T> {
        let body = response.text().await.map_err(SyncError::from)?;
        serde_json::from_str(&body).map_err(|e| SyncError::malformed(url, e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        address: Option<&str>,
    ) -> SyncResult<T> {
        logger::verbose(LogTag::Gateway, &format!("GET {}", url));
        let response = self.send(self.client.get(&url), &url, address).await?;
        Self::decode(response, &url).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> SyncResult<T> {
        logger::verbose(LogTag::Gateway, &format!("POST {}", url));
        let response = self.send(self.client.post(&url).json(body), &url, None).await?;
        Self::decode(response, &url).await
    }

    async fn fetch_used_batch(&self, addresses: Vec<String>) -> SyncResult<Vec<bool>> {
        let url = self.explorer("/addresses/used");
        let used: Vec<bool> = self.post_json(url.clone(), &addresses).await?;
        if used.len() != addresses.len() {
            return Err(SyncError::malformed(
                url,
                format!("expected {} flags, got {}", addresses.len(), used.len()),
            ));
        }
        Ok(used)
    }

    async fn fetch_price_batch(
        &self,
        symbols: Vec<String>,
        currency: &str,
    ) -> SyncResult<Vec<(String, f64)>> {
        let url = self.explorer(&format!("/market/prices?currency={}", currency.to_lowercase()));
        let prices: Vec<Option<f64>> = self.post_json(url.clone(), &symbols).await?;
        if prices.len() != symbols.len() {
            return Err(SyncError::malformed(
                url,
                format!("expected {} prices, got {}", symbols.len(), prices.len()),
            ));
        }
        Ok(symbols
            .into_iter()
            .zip(prices)
            .filter_map(|(symbol, price)| price.map(|p| (symbol, p)))
            .collect())
    }
}

// =============================================================================
// GATEWAY IMPLEMENTATION
// =============================================================================

#[async_trait]
impl ChainGateway for HttpGateway {
    async fn get_balance(&self, address: &str, _network: &str) -> SyncResult<TokenBalance> {
        let url = self.explorer(&format!("/addresses/{}/balance", address));
        let response: BalanceResponse = self.get_json(url, Some(address)).await?;
        TokenBalance::new(self.native_token_id.clone(), response.balance, response.locked_balance)
    }

    async fn get_token_balances_page(
        &self,
        address: &str,
        _network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TokenBalance>> {
        let url = self.explorer(&format!(
            "/addresses/{}/tokens-balance?page={}&limit={}",
            address, page, limit
        ));
        let rows: Vec<TokenBalanceResponse> = self.get_json(url, Some(address)).await?;
        rows.into_iter()
            .map(|row| TokenBalance::new(row.token_id, row.balance, row.locked_balance))
            .collect()
    }

    async fn get_address_activity(
        &self,
        address: &str,
        network: &str,
    ) -> SyncResult<AddressActivity> {
        let url = self.explorer(&format!("/addresses/{}/used", address));
        let used: bool = self.get_json(url, Some(address)).await?;
        if !used {
            return Ok(AddressActivity {
                used,
                latest_transaction: None,
            });
        }
        let latest = self
            .get_transactions_page(address, network, 1, 1)
            .await?
            .into_iter()
            .next();
        Ok(AddressActivity {
            used,
            latest_transaction: latest,
        })
    }

    async fn get_addresses_used(
        &self,
        addresses: &[String],
        _network: &str,
    ) -> SyncResult<Vec<bool>> {
        fetch_in_batches(addresses, self.max_addresses_per_request, |batch| {
            self.fetch_used_batch(batch)
        })
        .await
    }

    async fn get_transactions_page(
        &self,
        address: &str,
        _network: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<TransactionSummary>> {
        let url = self.explorer(&format!(
            "/addresses/{}/transactions?page={}&limit={}",
            address, page, limit
        ));
        let txs: Vec<ExplorerTransaction> = self.get_json(url, Some(address)).await?;
        Ok(txs.into_iter().map(TransactionSummary::from).collect())
    }

    async fn get_token_type(&self, token_id: &str, _network: &str) -> SyncResult<TokenStandard> {
        let url = self.explorer(&format!("/tokens/{}", token_id));
        let info: TokenInfoResponse = self.get_json(url.clone(), None).await?;
        parse_category(&url, &info.category)
    }

    async fn get_token_metadata(
        &self,
        token_id: &str,
        _network: &str,
    ) -> SyncResult<TokenMetadata> {
        let url = self.node(&format!("/tokens/{}/metadata", token_id));
        let mut metadata: TokenMetadata = self.get_json(url, None).await?;
        metadata.id = token_id.to_string();
        Ok(metadata)
    }

    async fn get_price(&self, symbol: &str, currency: &str) -> SyncResult<f64> {
        self.fetch_price_batch(vec![symbol.to_string()], currency)
            .await?
            .into_iter()
            .next()
            .map(|(_, price)| price)
            .ok_or_else(|| SyncError::not_found(format!("price for {}/{}", symbol, currency)))
    }

    async fn get_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> SyncResult<Vec<(String, f64)>> {
        fetch_in_batches(symbols, self.max_tokens_per_request, |batch| {
            self.fetch_price_batch(batch, currency)
        })
        .await
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> SyncResult<TransactionStatus> {
        let url = self.explorer(&format!("/transactions/{}", tx_hash));
        match self.get_json::<ExplorerTransactionState>(url, None).await {
            Ok(ExplorerTransactionState::Accepted(tx)) => {
                Ok(TransactionStatus::Confirmed(tx.into()))
            }
            Ok(ExplorerTransactionState::Pending(_)) => Ok(TransactionStatus::Mempooled),
            // Not yet visible to the explorer at all
            Err(SyncError::Permanent(crate::errors::PermanentError::NotFound { .. })) => {
                Ok(TransactionStatus::Pending)
            }
            Err(e) => Err(e),
        }
    }

    async fn submit_transaction(
        &self,
        unsigned_tx: &str,
        signature: &str,
    ) -> SyncResult<SubmitResult> {
        let url = self.node("/transactions/submit");
        let response: SubmitResponse = self
            .post_json(url, &SubmitRequest { unsigned_tx, signature })
            .await?;
        Ok(SubmitResult {
            tx_hash: response.tx_id,
            from_group: response.from_group,
            to_group: response.to_group,
        })
    }
}
