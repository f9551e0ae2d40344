use std::collections::BTreeSet;

/// Largest `M` such that every index in `0..=M` is present
///
/// Returns `None` when index 0 is absent: without it the wallet has no
/// contiguous prefix to restore from.
pub fn find_max_index_before_first_gap(indices: &BTreeSet<u32>) -> Option<u32> {
    if !indices.contains(&0) {
        return None;
    }
    let mut highest = 0u32;
    for &index in indices.iter().skip(1) {
        if index != highest + 1 {
            break;
        }
        highest = index;
    }
    Some(highest)
}
