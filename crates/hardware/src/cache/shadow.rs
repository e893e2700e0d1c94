//! Shadow tags for miss-curve sampling.
//!
//! Every requester gets a private, data-less LRU directory covering a sample of the
//! real cache's sets (every `sample_interval`-th set) at full associativity. Each access
//! is replayed against the requester's shadow set and the hit is binned by its LRU
//! stack distance, which yields the requester's hits-versus-ways curve as if it had
//! the whole cache to itself.

use crate::common::{PhysAddr, RequesterId};

use super::tags::Geometry;

/// Hits per stack distance plus misses, for one requester.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitCurve {
    /// `hits[d]` counts hits at LRU stack distance `d`.
    pub hits: Vec<u64>,
    /// Accesses that missed at every distance.
    pub misses: u64,
}

impl HitCurve {
    /// Creates an empty curve for `assoc` ways.
    pub fn new(assoc: usize) -> Self {
        Self {
            hits: vec![0; assoc],
            misses: 0,
        }
    }

    /// Hits the requester would see with `ways` ways.
    pub fn hits_with(&self, ways: usize) -> u64 {
        self.hits.iter().take(ways).sum()
    }

    /// Total sampled accesses.
    pub fn accesses(&self) -> u64 {
        self.hits_with(self.hits.len()) + self.misses
    }

    /// Adds another curve into this one.
    pub fn accumulate(&mut self, other: &Self) {
        if self.hits.len() < other.hits.len() {
            self.hits.resize(other.hits.len(), 0);
        }
        for (dst, src) in self.hits.iter_mut().zip(&other.hits) {
            *dst += src;
        }
        self.misses += other.misses;
    }
}

/// Sampled per-requester LRU shadow directories.
#[derive(Debug)]
pub struct ShadowTags {
    geometry: Geometry,
    sample_interval: usize,
    /// `[requester][sampled set]` stacks of tags, MRU first.
    stacks: Vec<Vec<Vec<u64>>>,
    curves: Vec<HitCurve>,
}

impl ShadowTags {
    /// Creates shadow tags.
    ///
    /// # Arguments
    ///
    /// * `geometry` - Geometry of the cache being sampled.
    /// * `num_requesters` - Requesters to track.
    /// * `sample_interval` - Sample every n-th set; `0` or `1` samples all sets.
    pub fn new(geometry: Geometry, num_requesters: usize, sample_interval: usize) -> Self {
        let sample_interval = sample_interval.max(1);
        let sampled = geometry.sets.div_ceil(sample_interval);
        Self {
            geometry,
            sample_interval,
            stacks: vec![vec![Vec::with_capacity(geometry.assoc); sampled]; num_requesters],
            curves: vec![HitCurve::new(geometry.assoc); num_requesters],
        }
    }

    /// Replays an access.
    ///
    /// # Returns
    ///
    /// The stack distance of the hit, or `None` for a miss or an unsampled set.
    pub fn access(&mut self, addr: PhysAddr, requester: RequesterId) -> Option<usize> {
        let set = self.geometry.set_of(addr);
        if set % self.sample_interval != 0 {
            return None;
        }
        let tag = self.geometry.tag_of(addr);
        let assoc = self.geometry.assoc;
        let stack = self
            .stacks
            .get_mut(requester)?
            .get_mut(set / self.sample_interval)?;
        let curve = &mut self.curves[requester];
        if let Some(distance) = stack.iter().position(|&t| t == tag) {
            let _ = stack.remove(distance);
            stack.insert(0, tag);
            curve.hits[distance] += 1;
            Some(distance)
        } else {
            if stack.len() == assoc {
                let _ = stack.pop();
            }
            stack.insert(0, tag);
            curve.misses += 1;
            None
        }
    }

    /// Curves collected since the last reset.
    pub fn curves(&self) -> &[HitCurve] {
        &self.curves
    }

    /// Clears the counters; the shadow directories keep their contents.
    pub fn reset(&mut self) {
        for curve in &mut self.curves {
            *curve = HitCurve::new(self.geometry.assoc);
        }
    }
}
