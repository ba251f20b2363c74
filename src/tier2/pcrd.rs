//! Post-compression rate-distortion optimisation (§4.6.3, Annex J): pick,
//! for each code-block and each quality layer, the coding-pass truncation
//! point that maximises distortion reduction for the bytes spent, using the
//! convex-hull / Lagrange-multiplier method of Taubman & Marcellin.

use crate::image::CodeBlock;

/// One point on a code-block's rate-distortion curve: including
/// `pass_count` coding passes costs `length` bytes and removes
/// `distortion` (cumulative) distortion relative to coding nothing.
#[derive(Debug, Clone, Copy)]
pub struct HullPoint {
    pub pass_count: u32,
    pub length: u32,
    pub distortion: f64,
}

/// Builds the upper convex hull of a code-block's `(length, distortion)`
/// operating points, always including the origin (0 passes, 0 bytes, 0
/// distortion reduction). Only points that lie on the hull are kept —
/// truncating at any other pass count is dominated by a hull point that
/// costs no more and reduces at least as much distortion.
pub fn convex_hull(block: &CodeBlock) -> Vec<HullPoint> {
    let mut hull = vec![HullPoint {
        pass_count: 0,
        length: 0,
        distortion: 0.0,
    }];
    for (i, (&length, &distortion)) in block
        .pass_lengths
        .iter()
        .zip(block.pass_distortion.iter())
        .enumerate()
    {
        let candidate = HullPoint {
            pass_count: (i + 1) as u32,
            length,
            distortion,
        };
        while hull.len() >= 2 {
            let a = hull[hull.len() - 2];
            let b = hull[hull.len() - 1];
            if slope(a, b) <= slope(b, candidate) {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(candidate);
    }
    hull
}

fn slope(from: HullPoint, to: HullPoint) -> f64 {
    let dlen = to.length as f64 - from.length as f64;
    if dlen <= 0.0 {
        f64::INFINITY
    } else {
        (to.distortion - from.distortion) / dlen
    }
}

/// The largest hull point whose incremental slope is still `>= threshold`,
/// walking out from the origin. Lower thresholds admit more (cheaper, less
/// valuable) passes.
fn point_at_slope(hull: &[HullPoint], threshold: f64) -> HullPoint {
    let mut chosen = hull[0];
    for window in hull.windows(2) {
        let (prev, next) = (window[0], window[1]);
        if slope(prev, next) >= threshold {
            chosen = next;
        } else {
            break;
        }
    }
    chosen
}

fn max_finite_slope(hull: &[HullPoint]) -> f64 {
    hull.windows(2)
        .map(|w| slope(w[0], w[1]))
        .filter(|s| s.is_finite())
        .fold(0.0_f64, f64::max)
}

/// Per-layer allocation result: for each code-block (in the same order as
/// the input slice), the cumulative number of coding passes included by
/// the end of this layer.
pub type LayerAllocation = Vec<u32>;

/// Allocates coding passes to quality layers so that each layer's
/// cumulative byte budget is met as closely as possible without exceeding
/// it, via bisection on the Lagrangian slope threshold shared across all
/// code-blocks in the tile.
///
/// `layer_budgets` gives each layer's *additional* byte allowance (not
/// cumulative). Returns one `LayerAllocation` per layer holding the
/// cumulative included-pass count per code-block.
pub fn allocate_layers(codeblocks: &[CodeBlock], layer_budgets: &[u32]) -> Vec<LayerAllocation> {
    let hulls: Vec<Vec<HullPoint>> = codeblocks.iter().map(convex_hull).collect();
    let global_max_slope = hulls
        .iter()
        .map(|h| max_finite_slope(h))
        .fold(0.0_f64, f64::max);

    let mut cumulative_budget = 0u64;
    let mut allocations = Vec::with_capacity(layer_budgets.len());
    for &budget in layer_budgets {
        cumulative_budget += budget as u64;
        let slope_threshold = bisect_for_budget(&hulls, cumulative_budget, global_max_slope);
        let allocation: LayerAllocation = hulls
            .iter()
            .map(|hull| point_at_slope(hull, slope_threshold).pass_count)
            .collect();
        allocations.push(allocation);
    }
    allocations
}

fn total_length_at_slope(hulls: &[Vec<HullPoint>], threshold: f64) -> u64 {
    hulls
        .iter()
        .map(|hull| point_at_slope(hull, threshold).length as u64)
        .sum()
}

/// Bisects the slope threshold so the total selected length is the
/// largest value not exceeding `budget`. 48 iterations is enough to
/// resolve a `f64` slope range that starts at `[0, global_max_slope]`.
fn bisect_for_budget(hulls: &[Vec<HullPoint>], budget: u64, global_max_slope: f64) -> f64 {
    if global_max_slope <= 0.0 {
        return 0.0;
    }
    let mut lo = 0.0_f64;
    let mut hi = global_max_slope;
    for _ in 0..48 {
        let mid = lo + (hi - lo) / 2.0;
        if total_length_at_slope(hulls, mid) <= budget {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Commits a layer allocation back onto each code-block's
/// `included_passes`, used once the final layer for a tile has been
/// chosen so Tier-1's truncated `coded_bytes` can be sliced per Tier-2's
/// request.
pub fn apply_allocation(codeblocks: &mut [CodeBlock], allocation: &LayerAllocation) {
    for (block, &passes) in codeblocks.iter_mut().zip(allocation.iter()) {
        block.included_passes = passes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_curve(lengths: &[u32], distortions: &[f64]) -> CodeBlock {
        let mut block = CodeBlock::new(0, 0, 4, 4);
        block.mb = lengths.len() as u8;
        block.pass_lengths = lengths.to_vec();
        block.pass_distortion = distortions.to_vec();
        block
    }

    #[test]
    fn convex_hull_drops_concave_interior_points() {
        // Pass 2 gives little extra distortion reduction for its cost
        // relative to the line from pass 1 to pass 3, so it should be
        // dropped from the hull.
        let block = block_with_curve(&[10, 20, 40], &[100.0, 110.0, 180.0]);
        let hull = convex_hull(&block);
        let pass_counts: Vec<u32> = hull.iter().map(|p| p.pass_count).collect();
        assert_eq!(pass_counts, vec![0, 1, 3]);
    }

    #[test]
    fn allocate_layers_respects_budget_and_is_nondecreasing() {
        let blocks = vec![
            block_with_curve(&[5, 15, 30], &[50.0, 90.0, 150.0]),
            block_with_curve(&[8, 16, 24], &[40.0, 70.0, 95.0]),
        ];
        let allocations = allocate_layers(&blocks, &[20, 40]);
        assert_eq!(allocations.len(), 2);
        for (a, b) in allocations[0].iter().zip(allocations[1].iter()) {
            assert!(b >= a, "later layers must not include fewer passes");
        }
    }

    #[test]
    fn zero_budget_selects_no_passes() {
        let blocks = vec![block_with_curve(&[5, 15], &[50.0, 90.0])];
        let allocations = allocate_layers(&blocks, &[0]);
        assert_eq!(allocations[0], vec![0]);
    }
}
