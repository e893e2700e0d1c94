//! Utility-based cache partitioning.
//!
//! Both searches maximise the total number of hits predicted by the hit curves while
//! giving every requester at least one way:
//! 1. **Exhaustive:** enumerates every composition of the associativity.
//! 2. **Lookahead:** the greedy marginal-utility search, which looks past plateaus in a
//!    curve by considering every allocation size still affordable.

use crate::cache::shadow::HitCurve;

use super::PartitionPolicy;

fn hits(curves: &[HitCurve], r: usize, ways: usize) -> u64 {
    curves.get(r).map_or(0, |c| c.hits_with(ways))
}

/// Exhaustive search over all allocations.
#[derive(Clone, Copy, Debug, Default)]
pub struct UcpExhaustive;

impl UcpExhaustive {
    fn search(
        curves: &[HitCurve],
        current: &mut Vec<usize>,
        left: usize,
        n: usize,
        best: &mut Option<(u64, Vec<usize>)>,
    ) {
        let r = current.len();
        if r + 1 == n {
            current.push(left);
            let total = (0..n).map(|i| hits(curves, i, current[i])).sum::<u64>();
            if best.as_ref().is_none_or(|(b, _)| total > *b) {
                *best = Some((total, current.clone()));
            }
            let _ = current.pop();
            return;
        }
        // Leave at least one way for each requester still to be served.
        for ways in 1..=left - (n - r - 1) {
            current.push(ways);
            Self::search(curves, current, left - ways, n, best);
            let _ = current.pop();
        }
    }
}

impl PartitionPolicy for UcpExhaustive {
    fn name(&self) -> &'static str {
        "ucp-exhaustive"
    }

    fn compute(&self, curves: &[HitCurve], assoc: usize) -> Vec<Vec<usize>> {
        let n = curves.len();
        if n == 0 || n > assoc {
            return Vec::new();
        }
        let mut best = None;
        Self::search(curves, &mut Vec::with_capacity(n), assoc, n, &mut best);
        best.map(|(_, alloc)| vec![alloc]).unwrap_or_default()
    }
}

/// Greedy lookahead search.
#[derive(Clone, Copy, Debug, Default)]
pub struct UcpLookahead;

impl PartitionPolicy for UcpLookahead {
    fn name(&self) -> &'static str {
        "ucp-lookahead"
    }

    fn compute(&self, curves: &[HitCurve], assoc: usize) -> Vec<Vec<usize>> {
        let n = curves.len();
        // No partition gives every requester a way.
        if n == 0 || n > assoc {
            return Vec::new();
        }
        let mut alloc = vec![1; n];
        let mut balance = assoc - n;
        while balance > 0 {
            // (utility, extra ways) of the best step per requester.
            let mut winner: Option<(usize, f64, usize)> = None;
            for (r, &have) in alloc.iter().enumerate() {
                let base = hits(curves, r, have);
                let mut step = (0.0, 1);
                for extra in 1..=balance {
                    let gain = (hits(curves, r, have + extra) - base) as f64 / extra as f64;
                    if gain > step.0 {
                        step = (gain, extra);
                    }
                }
                if winner.is_none_or(|(_, best, _)| step.0 > best) {
                    winner = Some((r, step.0, step.1));
                }
            }
            let Some((r, _, extra)) = winner else {
                break;
            };
            alloc[r] += extra;
            balance -= extra;
        }
        vec![alloc]
    }
}
