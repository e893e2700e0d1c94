//! Butterfly network.
//!
//! `log2(n)` stages of 2x2 switches connect `n` interfaces (rounded up to a power of
//! two). Routing is by destination tag: stage `s` sets bit `stages - 1 - s` of the
//! current position to the destination's bit, so the path is fully determined by the
//! source and destination. A transfer reserves one channel per stage, each for the
//! ticks the payload streams through it; any busy channel refuses the whole path.

use super::{IfaceId, Topology};
use crate::common::{SimError, SimResult, Tick};

/// Butterfly with per-stage channel occupancy.
#[derive(Clone, Debug)]
pub struct Butterfly {
    stages: usize,
    /// `[stage][channel]` tick until which the channel is busy.
    channel_busy: Vec<Vec<Tick>>,
    link_delay: Tick,
    transfer_delay: Tick,
    width_bytes: u64,
}

impl Butterfly {
    /// Creates an idle network.
    ///
    /// # Arguments
    ///
    /// * `ifaces` - Interfaces to connect.
    /// * `link_delay` - Ticks per hop.
    /// * `transfer_delay` - Fixed delay added to every transfer.
    /// * `width_bytes` - Bytes moved per tick on one channel.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] if there is nothing to connect.
    pub fn new(ifaces: usize, link_delay: Tick, transfer_delay: Tick, width_bytes: u64) -> SimResult<Self> {
        if ifaces == 0 {
            return Err(SimError::config("butterfly", "no interfaces to connect"));
        }
        let radix = ifaces.next_power_of_two().max(2);
        let stages = radix.trailing_zeros() as usize;
        Ok(Self {
            stages,
            channel_busy: vec![vec![0; radix]; stages],
            link_delay,
            transfer_delay,
            width_bytes: width_bytes.max(1),
        })
    }

    /// Number of switch stages (hops).
    pub const fn stages(&self) -> usize {
        self.stages
    }

    /// Channel used at each stage by a transfer from `from` to `to`.
    pub fn route(&self, from: IfaceId, to: IfaceId) -> Vec<usize> {
        let mut pos = from;
        (0..self.stages)
            .map(|stage| {
                let bit = 1 << (self.stages - 1 - stage);
                pos = (pos & !bit) | (to & bit);
                pos
            })
            .collect()
    }
}

impl Topology for Butterfly {
    fn name(&self) -> &'static str {
        "butterfly"
    }

    fn try_reserve(&mut self, from: IfaceId, to: IfaceId, bytes: u64, now: Tick) -> Option<Tick> {
        let occupancy = bytes.div_ceil(self.width_bytes);
        let path = self.route(from, to);
        let arrival = |stage: usize| now + stage as Tick * self.link_delay;
        let free = path.iter().enumerate().all(|(stage, &channel)| {
            self.channel_busy[stage]
                .get(channel)
                .is_some_and(|&busy| busy <= arrival(stage))
        });
        if !free {
            return None;
        }
        for (stage, &channel) in path.iter().enumerate() {
            self.channel_busy[stage][channel] = arrival(stage) + occupancy;
        }
        Some(self.stages as Tick * self.link_delay + self.transfer_delay + occupancy)
    }
}
