use std::ops::RangeInclusive;

/// Whether `height` has enough confirmations to be scanned.
///
/// A height is eligible while `height + (min_conf - 1) <= network_height`.
pub fn is_eligible(height: u64, min_conf: u32, network_height: u64) -> bool {
    let depth = u64::from(min_conf.saturating_sub(1));
    height
        .checked_add(depth)
        .is_some_and(|needed| needed <= network_height)
}

/// Heights a tick starting at `next` may walk, if any.
pub fn eligible_range(next: u64, min_conf: u32, network_height: u64) -> Option<RangeInclusive<u64>> {
    let depth = u64::from(min_conf.saturating_sub(1));
    let last = network_height.checked_sub(depth)?;
    (next <= last).then_some(next..=last)
}
