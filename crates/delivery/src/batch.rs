//! Pure partitioning helpers: fixed-size batching and randomized A/B splits.

use rand::seq::SliceRandom;
use winback_core::types::Recipient;

/// Split a slice into contiguous batches of `size`; the last batch may be
/// shorter. `size == 0` or empty input yields no batches.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return Vec::new();
    }
    items.chunks(size).map(|c| c.to_vec()).collect()
}

/// Shuffle recipients (Fisher-Yates) and cut into two groups, group A taking
/// `round(n * percent_a / 100)` members. Group sizes are deterministic for a
/// given `percent_a` and `n`; membership is random. The groups are disjoint
/// and together reproduce the input exactly.
pub fn split_recipients(recipients: &[Recipient], percent_a: f64) -> (Vec<Recipient>, Vec<Recipient>) {
    let mut shuffled = recipients.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());

    let cut = ((shuffled.len() as f64) * (percent_a / 100.0)).round() as usize;
    let cut = cut.min(shuffled.len());
    let group_b = shuffled.split_off(cut);
    (shuffled, group_b)
}
