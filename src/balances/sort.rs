//! Display ordering for aggregated token lists
use super::types::AggregatedToken;
use std::cmp::Ordering;

/// Worth used for ordering; unpriced tokens rank as -1 so they sort last
fn sort_worth(token: &AggregatedToken) -> f64 {
    token.worth.unwrap_or(-1.0)
}

fn by_name_then_id(a: &AggregatedToken, b: &AggregatedToken) -> Ordering {
    a.name().cmp(b.name()).then_with(|| a.token_id.cmp(&b.token_id))
}

/// Listed fungible tokens: worth descending, then name, then id
pub fn sort_listed(tokens: &mut [AggregatedToken]) {
    tokens.sort_by(|a, b| {
        sort_worth(b)
            .total_cmp(&sort_worth(a))
            .then_with(|| by_name_then_id(a, b))
    });
}

/// Unlisted fungible tokens (and NFTs): name, then id
pub fn sort_by_name(tokens: &mut [AggregatedToken]) {
    tokens.sort_by(by_name_then_id);
}

/// Non-standard tokens carry no metadata: id only
pub fn sort_by_id(tokens: &mut [AggregatedToken]) {
    tokens.sort_by(|a, b| a.token_id.cmp(&b.token_id));
}
