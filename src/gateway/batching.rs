//! Request-size ceilings and ordered paging
//!
//! Explorer calls take bounded lists (addresses, token ids) and bounded page
//! sizes. Oversized requests are split into sequential sub-batches; paged
//! lists are fetched a window at a time and reassembled by page index, never
//! by arrival order.

use crate::errors::SyncResult;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;

/// Split `items` into chunks of at most `ceiling` elements
pub fn split_batches<T: Clone>(items: &[T], ceiling: usize) -> Vec<Vec<T>> {
    items.chunks(ceiling.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// Run `fetch` once per sub-batch, one sub-batch at a time, concatenating results
pub async fn fetch_in_batches<T, R, F, Fut>(
    items: &[T],
    ceiling: usize,
    mut fetch: F,
) -> SyncResult<Vec<R>>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = SyncResult<Vec<R>>>,
{
    let mut results = Vec::with_capacity(items.len());
    for batch in split_batches(items, ceiling) {
        results.extend(fetch(batch).await?);
    }
    Ok(results)
}

/// Concatenate fetched pages in page order, up to and including `last_page`
pub fn assemble_pages<T>(pages: impl IntoIterator<Item = (u32, Vec<T>)>, last_page: u32) -> Vec<T> {
    let ordered: BTreeMap<u32, Vec<T>> = pages.into_iter().collect();
    ordered
        .into_iter()
        .take_while(|(page, _)| *page <= last_page)
        .flat_map(|(_, items)| items)
        .collect()
}

/// Fetch every page of a 1-based paged list
///
/// Up to `window` pages are requested concurrently. The first page shorter
/// than `page_size` marks the end of the list; `max_pages` bounds the walk.
pub async fn fetch_all_pages<T, F, Fut>(
    page_size: u32,
    window: u32,
    max_pages: u32,
    fetch_page: F,
) -> SyncResult<Vec<T>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = SyncResult<Vec<T>>>,
{
    let window = window.max(1);
    let mut pages: Vec<(u32, Vec<T>)> = Vec::new();
    let mut last_page: Option<u32> = None;
    let mut next_page = 1u32;

    while next_page <= max_pages && last_page.is_none() {
        let end = next_page.saturating_add(window - 1).min(max_pages);

        let mut in_flight: FuturesUnordered<_> = (next_page..=end)
            .map(|page| {
                let request = fetch_page(page);
                async move { (page, request.await) }
            })
            .collect();

        while let Some((page, result)) = in_flight.next().await {
            let items = result?;
            if (items.len() as u32) < page_size {
                last_page = Some(last_page.map_or(page, |current| current.min(page)));
            }
            pages.push((page, items));
        }

        next_page = end + 1;
    }

    Ok(assemble_pages(pages, last_page.unwrap_or(max_pages)))
}
