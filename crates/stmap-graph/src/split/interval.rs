//! Interval arithmetic for splitting one axis

use std::ops::Range;

/// Partition `[0, extent)` into `parts` contiguous half-open intervals whose
/// lengths differ by at most one; earlier intervals take the remainder.
///
/// Returns an empty list when `parts` is 0 or exceeds `extent`.
#[must_use]
pub fn average_split(extent: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 || parts > extent {
        return Vec::new();
    }
    let base = extent / parts;
    let rem = extent % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < rem);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Input rows (or columns) an output interval reads, in un-padded input
/// coordinates, with the padding the sub-block still needs on each side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptiveField {
    /// Un-padded input interval
    pub input: Range<usize>,
    /// Padding before the first input element
    pub pad_before: usize,
    /// Padding after the last input element
    pub pad_after: usize,
}

/// Receptive field of `output` for a sliding window.
///
/// The padded input range `[start*stride, (end-1)*stride + k_eff)` is shifted
/// back by `pad_before` and clipped to `[0, input_extent)`; whatever falls
/// outside becomes the sub-block's own border padding.
#[must_use]
pub fn receptive_field(
    output: &Range<usize>,
    stride: usize,
    k_eff: usize,
    pad_before: usize,
    input_extent: usize,
) -> ReceptiveField {
    let start_p = output.start * stride;
    let end_p = output.end.saturating_sub(1) * stride + k_eff;
    let start = start_p.saturating_sub(pad_before).min(input_extent);
    let end = end_p.saturating_sub(pad_before).min(input_extent);
    ReceptiveField {
        input: start..end,
        pad_before: pad_before.saturating_sub(start_p),
        pad_after: end_p.saturating_sub(pad_before + input_extent),
    }
}
