use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn cache() -> QueryCache {
    QueryCache::new(
        &CacheConfig::default(),
        ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(100), 2.0, 3),
    )
}

/// Fetcher returning 1, 2, 3, ... on successive calls after `delay_ms`
fn counting_fetch(
    counter: &Arc<AtomicU32>,
    delay_ms: u64,
) -> impl Fn() -> BoxFuture<'static, SyncResult<u32>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(n)
        }
        .boxed()
    }
}

fn key() -> CacheKey {
    CacheKey::balance("addr-a", "mainnet")
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_fetch() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let (first, second) = tokio::join!(
        cache.get(key(), opts, counting_fetch(&calls, 50)),
        cache.get(key(), opts, counting_fetch(&calls, 50)),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.value, Some(1));
    assert_eq!(second.value, Some(1));
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_value_is_served_without_refetch() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let _: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 5)).await;
    let again: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 5)).await;

    assert!(again.is_ready());
    assert_eq!(again.value, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test(start_paused = true)]
async fn skipped_nodes_stay_idle_until_enabled() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let skipped: Node<u32> = cache.get(key(), opts.skip(true), counting_fetch(&calls, 0)).await;
    assert!(skipped.is_idle());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().nodes, 0);

    let enabled: Node<u32> = cache.get(key(), opts.skip(false), counting_fetch(&calls, 0)).await;
    assert!(enabled.is_ready());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_nodes_revalidate_in_background() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().stale_after(Duration::from_secs(30));

    let first: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 100)).await;
    assert_eq!(first.value, Some(1));

    tokio::time::advance(Duration::from_secs(31)).await;

    let stale: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 100)).await;
    assert!(stale.is_ready());
    assert!(stale.is_refreshing);
    assert_eq!(stale.value, Some(1));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let fresh: Node<u32> = cache.peek(&key());
    assert_eq!(fresh.value, Some(2));
    assert!(!fresh.is_refreshing);
    assert!(!fresh.is_stale);
}

#[tokio::test(start_paused = true)]
async fn never_stale_nodes_are_fetched_once() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().never_stale();
    let key = CacheKey::token_type("token-1", "mainnet");

    let _: Node<u32> = cache.get(key.clone(), opts, counting_fetch(&calls, 1)).await;
    tokio::time::advance(Duration::from_secs(86_400)).await;
    let later: Node<u32> = cache.get(key, opts, counting_fetch(&calls, 1)).await;

    assert!(!later.is_refreshing);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidation_orphans_in_flight_fetch() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let loading: Node<u32> = cache.load(key(), opts, counting_fetch(&calls, 100));
    assert!(loading.is_loading());

    assert_eq!(cache.invalidate(&KeyPattern::Exact(key())), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let after: Node<u32> = cache.peek(&key());
    assert!(after.is_idle());
    assert_eq!(after.value, None);
    assert_eq!(cache.stats().discarded, 1);

    let fresh: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 100)).await;
    assert_eq!(fresh.value, Some(2));
}

#[tokio::test(start_paused = true)]
async fn waiting_reader_follows_the_replacement_fetch() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let reader = {
        let (cache, fetch) = (cache.clone(), counting_fetch(&calls, 100));
        tokio::spawn(async move { cache.get::<u32, _, _>(key(), opts, fetch).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.invalidate(&KeyPattern::All);

    let node = reader.await.unwrap();
    assert!(node.is_ready());
    assert_eq!(node.value, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn waiting_reader_survives_a_clear() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let reader = {
        let (cache, fetch) = (cache.clone(), counting_fetch(&calls, 100));
        tokio::spawn(async move { cache.get::<u32, _, _>(key(), opts, fetch).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.clear();

    let node = reader.await.unwrap();
    assert!(node.is_ready());
    assert_eq!(node.value, Some(2));
    assert_eq!(cache.stats().nodes, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_immutable_lookup_is_retried_after_the_stale_window() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default().never_stale();
    let key = CacheKey::token_type("token-1", "mainnet");
    let fetch = {
        let counter = Arc::clone(&calls);
        move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SyncError::malformed("explorer", "truncated"))
                } else {
                    Ok(3u32)
                }
            }
        }
    };

    let failed: Node<u32> = cache.get(key.clone(), opts, fetch.clone()).await;
    assert!(failed.has_error());
    let cached: Node<u32> = cache.get(key.clone(), opts, fetch.clone()).await;
    assert!(cached.has_error());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(CacheConfig::default().stale_ms + 1)).await;
    let recovered: Node<u32> = cache.get(key.clone(), opts, fetch.clone()).await;
    assert!(recovered.is_ready());
    assert_eq!(recovered.value, Some(3));

    // once a value is known the node never goes stale again
    tokio::time::advance(Duration::from_secs(86_400)).await;
    let _: Node<u32> = cache.get(key, opts, fetch).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn subscribed_nodes_refetch_on_invalidate() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();
    let _subscription = cache.subscribe(key());

    let _: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 100)).await;
    cache.invalidate(&KeyPattern::Address("addr-a".to_string()));

    let during: Node<u32> = cache.peek(&key());
    assert!(during.is_ready());
    assert!(during.is_refreshing);
    assert_eq!(during.value, Some(1));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let after: Node<u32> = cache.peek(&key());
    assert_eq!(after.value, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_surface_without_retry() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let node: Node<u32> = cache
        .get(key(), QueryOptions::default(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::invalid_address("addr-a"))
            }
        })
        .await;

    assert!(node.has_error());
    assert!(matches!(
        node.error,
        Some(SyncError::Permanent(crate::errors::PermanentError::InvalidAddress { .. }))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_inside_the_node() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let node: Node<u32> = cache
        .get(key(), QueryOptions::default(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SyncError::timeout("explorer", 100))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

    assert!(node.is_ready());
    assert_eq!(node.value, Some(7));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn node_errors_do_not_fail_siblings() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();

    let good: Node<u32> = cache
        .get(CacheKey::balance("good", "mainnet"), opts, counting_fetch(&calls, 1))
        .await;
    let bad: Node<u32> = cache
        .get(CacheKey::balance("bad", "mainnet"), opts, || async {
            Err(SyncError::malformed("explorer", "truncated"))
        })
        .await;

    assert!(good.is_ready());
    let total = combine(&[good, bad], |values| values.into_iter().sum::<u32>());
    assert!(total.has_error());
    assert_eq!(total.value, Some(1));
}

#[tokio::test(start_paused = true)]
async fn unused_nodes_are_garbage_collected() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions {
        gc: Duration::from_secs(5),
        ..QueryOptions::default()
    };
    let kept = CacheKey::balance("kept", "mainnet");

    let _: Node<u32> = cache.get(key(), opts, counting_fetch(&calls, 1)).await;
    let _: Node<u32> = cache.get(kept.clone(), opts, counting_fetch(&calls, 1)).await;
    let _subscription = cache.subscribe(kept.clone());

    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.peek::<u32>(&key()).is_idle());
    assert!(cache.peek::<u32>(&kept).is_ready());
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn clear_drops_nodes_and_discards_late_results() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));

    let _: Node<u32> = cache.load(key(), QueryOptions::default(), counting_fetch(&calls, 100));
    cache.clear();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = cache.stats();
    assert_eq!(stats.nodes, 0);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.epoch, 1);
}

#[tokio::test(start_paused = true)]
async fn restored_snapshot_is_ready_but_revalidates() {
    let source = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();
    let _: Node<u32> = source.get(key(), opts, counting_fetch(&calls, 1)).await;

    let snapshot = CacheSnapshot::from_json(&source.snapshot().to_json().unwrap()).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.entries.contains_key("balance:addr-a:mainnet"));

    let target = cache();
    assert_eq!(target.restore(&snapshot), 1);

    let restored: Node<u32> = target.peek(&key());
    assert!(restored.is_ready());
    assert!(restored.is_stale);
    assert_eq!(restored.value, Some(1));

    let later_calls = Arc::new(AtomicU32::new(41));
    let served: Node<u32> = target.get(key(), opts, counting_fetch(&later_calls, 10)).await;
    assert_eq!(served.value, Some(1));
    assert!(served.is_refreshing);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(target.peek::<u32>(&key()).value, Some(42));
}

#[tokio::test(start_paused = true)]
async fn primed_values_are_served_without_fetching() {
    let cache = cache();
    let calls = Arc::new(AtomicU32::new(0));
    let opts = QueryOptions::default();
    let key = CacheKey::price("ALPH", "USD");

    cache.prime(key.clone(), opts, &9u32).unwrap();
    let node: Node<u32> = cache.get(key, opts, counting_fetch(&calls, 1)).await;

    assert_eq!(node.value, Some(9));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn gc_task_stops_on_shutdown() {
    let cache = cache();
    let shutdown = Arc::new(Notify::new());
    let handle = cache.spawn_gc(Duration::from_secs(1), Arc::clone(&shutdown));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    shutdown.notify_waiters();

    assert!(tokio::time::timeout(Duration::from_secs(5), handle).await.is_ok());
}
