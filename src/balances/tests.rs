use super::*;
use crate::config::{CacheConfig, NativeTokenConfig};
use crate::gateway::ExponentialBackoff;
use crate::testing::{MockGateway, NATIVE_ID};
use std::time::Duration;

const ALPH: u128 = 1_000_000_000_000_000_000;

fn listing() -> Arc<ListingIndex> {
    Arc::new(
        ListingIndex::new(&NativeTokenConfig::default()).with_tokens(vec![TokenMetadata {
            id: "usdt".to_string(),
            name: "Tether".to_string(),
            symbol: "USDT".to_string(),
            decimals: 6,
            logo_uri: None,
        }]),
    )
}

fn aggregator_with(
    gateway: &Arc<MockGateway>,
    gateway_config: &GatewayConfig,
) -> BalanceAggregator {
    let retry =
        ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(20), 2.0, 2);
    let cache = QueryCache::new(&CacheConfig::default(), retry.clone());
    let listing = listing();
    let worth = WorthCalculator::new(
        cache.clone(),
        gateway.clone(),
        Arc::clone(&listing),
        retry,
        "USD",
        Duration::from_secs(60),
    );
    BalanceAggregator::new(cache, gateway.clone(), listing, worth, gateway_config)
}

fn aggregator(gateway: &Arc<MockGateway>) -> BalanceAggregator {
    aggregator_with(gateway, &GatewayConfig::default())
}

fn addresses(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn ids(tokens: &[AggregatedToken]) -> Vec<&str> {
    tokens.iter().map(|t| t.token_id.as_str()).collect()
}

#[tokio::test]
async fn balances_of_the_same_token_are_summed_across_addresses() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", 5 * ALPH, ALPH)
        .with_balance("addr-b", 7 * ALPH, 0)
        .with_token("addr-a", "usdt", 10_000_000, 0)
        .with_token("addr-b", "usdt", 3_000_000, 1_000_000);

    let node = aggregator(&gateway)
        .wallet_balances(&addresses(&["addr-a", "addr-b"]), "mainnet")
        .await;
    assert!(node.is_ready());

    let balances = node.value.unwrap();
    let native = balances.iter().find(|b| b.token_id() == NATIVE_ID).unwrap();
    assert_eq!(native.total(), 12 * ALPH);
    assert_eq!(native.locked(), ALPH);

    let usdt = balances.iter().find(|b| b.token_id() == "usdt").unwrap();
    assert_eq!(usdt.total(), 13_000_000);
    assert_eq!(usdt.available(), 12_000_000);
    assert!(balances.iter().all(TokenBalance::is_consistent));
}

#[tokio::test]
async fn every_page_of_token_balances_is_collected() {
    let gateway = Arc::new(MockGateway::new());
    for i in 0..5 {
        gateway.with_token("addr-a", &format!("tok-{}", i), 100 + i as u128, 0);
    }
    let config = GatewayConfig {
        page_size: 2,
        page_window: 2,
        ..GatewayConfig::default()
    };

    let node = aggregator_with(&gateway, &config).token_balances("addr-a", "mainnet").await;
    let tokens: Vec<String> = node
        .value
        .unwrap()
        .iter()
        .map(|b| b.token_id().to_string())
        .collect();
    assert_eq!(tokens, vec!["tok-0", "tok-1", "tok-2", "tok-3", "tok-4"]);
}

#[tokio::test]
async fn tokens_land_in_exactly_one_class() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", ALPH, 0)
        .with_token("addr-a", "usdt", 1_000_000, 0)
        .with_token("addr-a", "ft-named", 50, 0)
        .with_token("addr-a", "ft-anon", 60, 0)
        .with_token("addr-a", "nft-1", 1, 0)
        .with_token("addr-a", "weird", 9, 0)
        .with_token_type("ft-named", TokenStandard::Fungible)
        .with_metadata("ft-named", "Named", "NMD", 2)
        .with_token_type("ft-anon", TokenStandard::Fungible)
        .with_token_type("nft-1", TokenStandard::NonFungible)
        .with_metadata("nft-1", "Picture", "", 0);

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert!(!out.has_error);
    assert!(!out.is_loading);
    assert_eq!(out.token_count(), 6);
    assert_eq!(out.listed_fts.len(), 2);
    // "Named" sorts before the id fallback "ft-anon" (uppercase first)
    assert_eq!(ids(&out.unlisted_fts), vec!["ft-named", "ft-anon"]);
    assert_eq!(out.unlisted_fts[1].name(), "ft-anon");
    assert_eq!(ids(&out.nfts), vec!["nft-1"]);
    assert_eq!(ids(&out.non_standard), vec!["weird"]);

    // listed tokens never reach the type endpoint
    assert_eq!(gateway.calls_for("token_type", "usdt"), 0);
    assert_eq!(gateway.calls_for("token_type", NATIVE_ID), 0);
    assert_eq!(gateway.calls("token_type"), 4);
}

#[tokio::test]
async fn listed_tokens_are_ordered_by_worth() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", 5 * ALPH, 0)
        .with_token("addr-a", "usdt", 13_000_000, 0)
        .with_price("ALPH", 1.0)
        .with_price("USDT", 1.0);

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert_eq!(ids(&out.listed_fts), vec!["usdt", NATIVE_ID]);
    assert_eq!(out.listed_fts[0].worth, Some(13.0));
    assert_eq!(out.listed_fts[1].worth, Some(5.0));
    assert_eq!(out.total_worth(), Some(18.0));
}

#[tokio::test]
async fn unpriced_listed_token_sorts_after_priced_ones() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", ALPH, 0)
        .with_token("addr-a", "usdt", 1, 0)
        .with_price("USDT", 1.0);

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert_eq!(ids(&out.listed_fts), vec!["usdt", NATIVE_ID]);
    assert_eq!(out.listed_fts[1].worth, None);
}

#[tokio::test]
async fn hidden_tokens_are_filtered_unless_requested() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", ALPH, 0)
        .with_token("addr-a", "spam", 1_000, 0);
    let agg = aggregator(&gateway);
    let hidden: HiddenTokens = vec!["spam".to_string()].into_iter().collect();
    let addrs = addresses(&["addr-a"]);

    let visible = agg.aggregate(&addrs, "mainnet", &hidden, false).await;
    assert!(visible.all_tokens().all(|t| t.token_id != "spam"));

    let everything = agg.aggregate(&addrs, "mainnet", &hidden, true).await;
    assert_eq!(ids(&everything.non_standard), vec!["spam"]);
}

#[tokio::test]
async fn zero_balances_are_dropped_except_native() {
    let gateway = Arc::new(MockGateway::new());
    gateway.with_token("addr-a", "empty", 0, 0);

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert_eq!(ids(&out.listed_fts), vec![NATIVE_ID]);
    assert_eq!(out.token_count(), 1);
}

#[tokio::test]
async fn token_types_are_looked_up_once() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_token("addr-a", "ft", 10, 0)
        .with_token("addr-b", "ft", 20, 0)
        .with_token_type("ft", TokenStandard::Fungible)
        .with_metadata("ft", "Fungible", "FT", 0);
    let agg = aggregator(&gateway);
    let addrs = addresses(&["addr-a", "addr-b"]);

    let first = agg.aggregate(&addrs, "mainnet", &HiddenTokens::new(), false).await;
    let second = agg.aggregate(&addrs, "mainnet", &HiddenTokens::new(), false).await;

    assert_eq!(first, second);
    assert_eq!(first.unlisted_fts[0].balance.total(), 30);
    assert_eq!(gateway.calls_for("token_type", "ft"), 1);
    assert_eq!(gateway.calls_for("token_metadata", "ft"), 1);
}

#[tokio::test]
async fn failed_address_does_not_hide_the_others() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", 2 * ALPH, 0)
        .with_balance("addr-b", 3 * ALPH, 0)
        .fail_always("token_balances", "addr-b", SyncError::invalid_address("addr-b"))
        .fail_always("balance", "addr-b", SyncError::invalid_address("addr-b"));

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a", "addr-b"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert!(out.has_error);
    assert!(!out.errors.is_empty());
    assert_eq!(out.listed_fts.len(), 1);
    assert_eq!(out.listed_fts[0].balance.total(), 2 * ALPH);
}

#[tokio::test]
async fn failed_type_lookup_omits_only_that_token() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", ALPH, 0)
        .with_token("addr-a", "broken", 5, 0)
        .with_token("addr-a", "fine", 5, 0)
        .fail_always("token_type", "broken", SyncError::malformed("token_type", "bad body"));

    let out = aggregator(&gateway)
        .aggregate(&addresses(&["addr-a"]), "mainnet", &HiddenTokens::new(), false)
        .await;

    assert!(out.has_error);
    assert!(out.all_tokens().all(|t| t.token_id != "broken"));
    assert_eq!(ids(&out.non_standard), vec!["fine"]);
}

#[tokio::test(start_paused = true)]
async fn failed_type_lookup_recovers_once_the_gateway_does() {
    let gateway = Arc::new(MockGateway::new());
    gateway
        .with_balance("addr-a", ALPH, 0)
        .with_token("addr-a", "flaky", 5, 0)
        .with_token_type("flaky", TokenStandard::Fungible)
        .with_metadata("flaky", "Flaky", "FLK", 0)
        .fail_once("token_type", "flaky", SyncError::timeout("explorer", 100))
        .fail_once("token_type", "flaky", SyncError::timeout("explorer", 100));
    let agg = aggregator(&gateway);
    let addrs = addresses(&["addr-a"]);

    let failed = agg.aggregate(&addrs, "mainnet", &HiddenTokens::new(), false).await;
    assert!(failed.has_error);
    assert!(failed.unlisted_fts.is_empty());
    assert_eq!(gateway.calls_for("token_type", "flaky"), 2);

    tokio::time::advance(Duration::from_secs(3600)).await;
    let recovered = agg.aggregate(&addrs, "mainnet", &HiddenTokens::new(), false).await;

    assert!(!recovered.has_error);
    assert_eq!(ids(&recovered.unlisted_fts), vec!["flaky"]);
    assert_eq!(gateway.calls_for("token_type", "flaky"), 3);
}

#[test]
fn merge_rejects_inconsistent_totals() {
    let a = TokenBalance::new("t", u128::MAX, 0).unwrap();
    let b = TokenBalance::new("t", 1, 0).unwrap();
    assert!(merge_balances([&a, &b]).is_err());

    let c = TokenBalance::new("u", 4, 1).unwrap();
    let merged = merge_balances([&c, &c]).unwrap();
    assert_eq!(merged[0].total(), 8);
    assert_eq!(merged[0].locked(), 2);
}
