//! Fiat worth of token amounts
//!
//! `worth = amount / 10^decimals * price`. A token without a price quote has
//! unknown worth (`None`), which callers must keep apart from zero worth.
//! Quotes live in the query cache under `price:<symbol>:<currency>` together
//! with the time they were fetched; a symbol the price service does not know
//! is cached as `None` like any other answer.

use crate::balances::ListingIndex;
use crate::cache::{CacheKey, Node, QueryCache, QueryOptions};
use crate::errors::{PermanentError, SyncError, SyncResult};
use crate::gateway::{with_retry, ChainGateway, ExponentialBackoff};
use crate::logger::{self, LogTag};
use crate::types::{PriceQuote, TokenBalance};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Pure worth formula; `None` without a usable price
pub fn worth(amount: u128, decimals: u8, price: Option<f64>) -> Option<f64> {
    let price = price.filter(|p| p.is_finite() && *p >= 0.0)?;
    let scale = 10f64.powi(i32::from(decimals));
    Some(amount as f64 / scale * price)
}

#[derive(Clone)]
pub struct WorthCalculator {
    cache: QueryCache,
    gateway: Arc<dyn ChainGateway>,
    listing: Arc<ListingIndex>,
    retry: ExponentialBackoff,
    currency: String,
    price_options: QueryOptions,
}

impl WorthCalculator {
    pub fn new(
        cache: QueryCache,
        gateway: Arc<dyn ChainGateway>,
        listing: Arc<ListingIndex>,
        retry: ExponentialBackoff,
        currency: impl Into<String>,
        price_stale: Duration,
    ) -> Self {
        let price_options = cache.default_options().stale_after(price_stale);
        Self {
            cache,
            gateway,
            listing,
            retry,
            currency: currency.into(),
            price_options,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Quote node for a symbol in the configured currency
    pub async fn price(&self, symbol: &str) -> Node<Option<PriceQuote>> {
        let gateway = Arc::clone(&self.gateway);
        let symbol_owned = symbol.to_string();
        let currency = self.currency.clone();

        self.cache
            .get(CacheKey::price(symbol, &self.currency), self.price_options, move || {
                let gateway = Arc::clone(&gateway);
                let symbol = symbol_owned.clone();
                let currency = currency.clone();
                async move {
                    match gateway.get_price(&symbol, &currency).await {
                        Ok(price) => Ok(Some(PriceQuote {
                            symbol,
                            currency,
                            price,
                            fetched_at: Utc::now(),
                        })),
                        Err(SyncError::Permanent(PermanentError::NotFound { .. })) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await
    }

    /// Worth of `amount` minor units of a listed token
    ///
    /// Unlisted tokens have no trusted symbol to price and yield `None`.
    pub async fn worth(&self, token_id: &str, amount: u128, decimals: u8) -> Option<f64> {
        let symbol = self.listing.get(token_id)?.symbol.clone();
        let price = self.price(&symbol).await.value.flatten().map(|quote| quote.price);
        worth(amount, decimals, price)
    }

    /// Worth of a balance's total amount, with the listed decimals
    pub async fn balance_worth(&self, balance: &TokenBalance) -> Option<f64> {
        let decimals = self.listing.get(balance.token_id())?.decimals;
        self.worth(balance.token_id(), balance.total(), decimals).await
    }

    /// Sum over tokens with a known price; `None` if no token has one
    pub async fn wallet_worth(&self, balances: &[TokenBalance]) -> Option<f64> {
        let symbols: Vec<String> = balances
            .iter()
            .filter_map(|b| self.listing.get(b.token_id()))
            .map(|m| m.symbol.clone())
            .collect();
        if let Err(e) = self.prefetch_prices(&symbols).await {
            logger::debug(
                LogTag::Worth,
                &format!("Batched price prefetch failed, falling back to single quotes: {}", e),
            );
        }

        let worths = join_all(balances.iter().map(|b| self.balance_worth(b))).await;
        let total = worths
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<f64>, w| Some(acc.unwrap_or(0.0) + w));

        logger::debug(
            LogTag::Worth,
            &format!(
                "Wallet worth over {} balances: {:?} {}",
                balances.len(),
                total,
                self.currency
            ),
        );
        total
    }

    /// Fill missing or stale price nodes with one batched request
    pub async fn prefetch_prices(&self, symbols: &[String]) -> SyncResult<usize> {
        let mut wanted: Vec<String> = symbols
            .iter()
            .filter(|symbol| {
                let node: Node<Option<PriceQuote>> =
                    self.cache.peek(&CacheKey::price(symbol, &self.currency));
                node.value.is_none() || node.is_stale
            })
            .cloned()
            .collect();
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(0);
        }

        let quotes = with_retry(&self.retry, "prices", || {
            self.gateway.get_prices(&wanted, &self.currency)
        })
        .await?;

        let fetched_at = Utc::now();
        for symbol in &wanted {
            let quote = quotes
                .iter()
                .find(|(quoted, _)| quoted == symbol)
                .map(|(_, price)| PriceQuote {
                    symbol: symbol.clone(),
                    currency: self.currency.clone(),
                    price: *price,
                    fetched_at,
                });
            self.cache
                .prime(CacheKey::price(symbol, &self.currency), self.price_options, &quote)?;
        }
        Ok(wanted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, NativeTokenConfig};
    use crate::testing::{MockGateway, NATIVE_ID};
    use crate::types::TokenMetadata;

    fn calculator(gateway: &Arc<MockGateway>) -> WorthCalculator {
        let usdt = TokenMetadata {
            id: "usdt".to_string(),
            name: "Tether".to_string(),
            symbol: "USDT".to_string(),
            decimals: 6,
            logo_uri: None,
        };
        let listing = ListingIndex::new(&NativeTokenConfig::default()).with_tokens(vec![usdt]);
        let retry =
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(20), 2.0, 2);
        WorthCalculator::new(
            QueryCache::new(&CacheConfig::default(), retry.clone()),
            gateway.clone(),
            Arc::new(listing),
            retry,
            "USD",
            Duration::from_secs(60),
        )
    }

    #[test]
    fn formula_scales_by_decimals() {
        assert_eq!(worth(2_500_000, 6, Some(2.0)), Some(5.0));
        assert_eq!(worth(10u128.pow(18), 18, Some(0.5)), Some(0.5));
        assert_eq!(worth(0, 18, Some(3.0)), Some(0.0));
    }

    #[test]
    fn missing_price_is_unknown_not_zero() {
        assert_eq!(worth(1_000, 2, None), None);
        assert_eq!(worth(1_000, 2, Some(f64::NAN)), None);
    }

    #[test]
    fn worth_is_monotonic_in_price_and_amount() {
        let amounts = [0u128, 1, 999, 1_000_000, u64::MAX as u128, u128::MAX];
        let prices = [0.0, 0.001, 1.0, 42.5, 1e9];
        for decimals in [0u8, 6, 18] {
            for pair in amounts.windows(2) {
                for &price in &prices {
                    let (low, high) = (pair[0], pair[1]);
                    let price = Some(price);
                    assert!(worth(low, decimals, price) <= worth(high, decimals, price));
                }
            }
            for pair in prices.windows(2) {
                for &amount in &amounts {
                    let (low, high) = (Some(pair[0]), Some(pair[1]));
                    assert!(worth(amount, decimals, low) <= worth(amount, decimals, high));
                }
            }
        }
    }

    #[tokio::test]
    async fn listed_token_worth_uses_cached_price() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_price("USDT", 1.0);
        let calc = calculator(&gateway);

        assert_eq!(calc.worth("usdt", 3_000_000, 6).await, Some(3.0));
        assert_eq!(calc.worth("usdt", 1_000_000, 6).await, Some(1.0));
        assert_eq!(gateway.calls("price"), 1);
    }

    #[tokio::test]
    async fn price_nodes_keep_the_quote_and_its_fetch_time() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_price("USDT", 0.99);
        let calc = calculator(&gateway);

        let before = Utc::now();
        let quote = calc.price("USDT").await.value.flatten().unwrap();
        assert_eq!(quote.symbol, "USDT");
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.price, 0.99);
        assert!(quote.fetched_at >= before && quote.fetched_at <= Utc::now());

        // primed quotes carry the same shape
        calc.prefetch_prices(&["ALPH".to_string()]).await.unwrap();
        let node: Node<Option<PriceQuote>> = calc.cache.peek(&CacheKey::price("ALPH", "USD"));
        assert_eq!(node.value, Some(None));
    }

    #[tokio::test]
    async fn unknown_price_and_unlisted_token_are_none() {
        let gateway = Arc::new(MockGateway::new());
        let calc = calculator(&gateway);

        assert_eq!(calc.worth(NATIVE_ID, 10u128.pow(18), 18).await, None);
        assert_eq!(calc.worth("not-listed", 1, 0).await, None);
        assert_eq!(gateway.calls_for("price", "ALPH"), 1);
    }

    #[tokio::test]
    async fn wallet_worth_sums_priced_tokens_only() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_price("ALPH", 2.0);
        let calc = calculator(&gateway);

        let balances = vec![
            TokenBalance::new(NATIVE_ID, 3 * 10u128.pow(18), 0).unwrap(),
            TokenBalance::new("usdt", 5_000_000, 0).unwrap(),
            TokenBalance::new("not-listed", 77, 0).unwrap(),
        ];
        assert_eq!(calc.wallet_worth(&balances).await, Some(6.0));
        // the prefetch primed both listed symbols, nothing is fetched twice
        assert_eq!(gateway.calls("price"), 2);
    }

    #[tokio::test]
    async fn wallet_without_any_price_has_unknown_worth() {
        let gateway = Arc::new(MockGateway::new());
        let calc = calculator(&gateway);
        let balances = vec![TokenBalance::new("usdt", 5, 0).unwrap()];
        assert_eq!(calc.wallet_worth(&balances).await, None);
    }
}
