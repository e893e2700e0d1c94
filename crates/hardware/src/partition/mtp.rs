//! Time-multiplexed partitioning.
//!
//! Requesters that already reach `threshold` of their full-cache hits with their share
//! of the ways are *suppliers*: they keep the fewest ways that still reach the threshold
//! and give up the rest. Shares are recomputed over the remaining ways until no further
//! supplier appears. The requesters left over are *thrashing*; each gets a turn as the
//! favoured requester holding most of the remaining ways while the others keep a small
//! base allocation.
//!
//! With at most one thrashing requester there is nothing to multiplex and the policy
//! falls back to an equal share.

use tracing::debug;

use crate::cache::shadow::HitCurve;

use super::{PartitionPolicy, equal_share};

/// Time-multiplexed partition policy.
#[derive(Clone, Copy, Debug)]
pub struct Mtp {
    threshold: f64,
}

impl Mtp {
    /// Creates the policy with the given supplier threshold in `[0, 1]`.
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Splits the requesters into suppliers (with their way counts) and thrashing ones.
    ///
    /// # Returns
    ///
    /// `(supplier ways per requester, thrashing requesters, ways left for them)`.
    pub fn classify(&self, curves: &[HitCurve], assoc: usize) -> (Vec<Option<usize>>, Vec<usize>, usize) {
        let mut supplied = vec![None; curves.len()];
        let mut thrashing: Vec<usize> = (0..curves.len()).collect();
        let mut avail = assoc;
        loop {
            if thrashing.is_empty() {
                break;
            }
            let share = avail / thrashing.len();
            let mut changed = false;
            for &r in &thrashing {
                let curve = &curves[r];
                let target = self.threshold * curve.hits_with(assoc) as f64;
                if (curve.hits_with(share) as f64) < target {
                    continue;
                }
                let ways = (1..=share)
                    .find(|&w| curve.hits_with(w) as f64 >= target)
                    .unwrap_or(share);
                supplied[r] = Some(ways);
                avail -= ways;
                changed = true;
            }
            thrashing.retain(|&r| supplied[r].is_none());
            if !changed {
                break;
            }
        }
        (supplied, thrashing, avail)
    }
}

impl PartitionPolicy for Mtp {
    fn name(&self) -> &'static str {
        "mtp"
    }

    fn compute(&self, curves: &[HitCurve], assoc: usize) -> Vec<Vec<usize>> {
        let (supplied, thrashing, avail) = self.classify(curves, assoc);
        debug!(?supplied, ?thrashing, avail, "mtp classification");
        if thrashing.len() <= 1 {
            return vec![equal_share(assoc, curves.len())];
        }
        let t = thrashing.len();
        let base = (avail / (2 * t)).max(1);
        let favoured = avail - base * (t - 1);
        thrashing
            .iter()
            .map(|&fav| {
                supplied
                    .iter()
                    .enumerate()
                    .map(|(r, ways)| match ways {
                        Some(w) => *w,
                        None if r == fav => favoured,
                        None => base,
                    })
                    .collect()
            })
            .collect()
    }
}
