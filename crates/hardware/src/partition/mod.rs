//! Shared-cache partitioning controller.
//!
//! The controller drives the way quotas of the shared L2 banks through a small state
//! machine:
//!
//! ```text
//! Measuring --warmup--> Collect --epoch--> Enforce --epoch--> Collect --> ...
//! ```
//!
//! 1. **Measuring:** no quotas; the caches warm up.
//! 2. **Collect:** equal-share quotas while the shadow tags sample fresh hit curves.
//! 3. **Enforce:** the policy turns the curves into a rotation of partitions; each
//!    partition holds for `epoch / rotation.len()` ticks.
//!
//! Policies implement [`PartitionPolicy`]: utility-based partitioning ([`ucp`]) yields a
//! single partition, time-multiplexed partitioning ([`mtp`]) a rotation.

/// Time-multiplexed partitioning.
pub mod mtp;

/// Utility-based partitioning.
pub mod ucp;

use std::fs::File;
use std::io::{BufWriter, Write};

use tracing::debug;

use crate::cache::shadow::HitCurve;
use crate::common::{SimError, SimResult, Tick};
use crate::config::{PartitionConfig, PartitionPolicyKind};
use crate::stats::PartitionStats;

pub use mtp::Mtp;
pub use ucp::{UcpExhaustive, UcpLookahead};

/// Trait for partition policies.
pub trait PartitionPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Turns per-requester hit curves into a rotation of way allocations.
    ///
    /// # Arguments
    ///
    /// * `curves` - One hit curve per requester.
    /// * `assoc` - Ways to distribute.
    ///
    /// # Returns
    ///
    /// One or more partitions; each gives every requester at least one way and sums to
    /// `assoc`.
    fn compute(&self, curves: &[HitCurve], assoc: usize) -> Vec<Vec<usize>>;
}

/// Controller phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Warm-up; no quotas.
    Measuring,
    /// Sampling hit curves under equal share.
    Collect,
    /// Enforcing a computed rotation.
    Enforce,
}

impl Phase {
    /// Numeric code written to the allocation trace.
    pub const fn code(self) -> i8 {
        match self {
            Self::Measuring => -1,
            Self::Collect => 0,
            Self::Enforce => 1,
        }
    }
}

/// What the owner of the caches must do at an epoch boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochAction {
    /// Quotas to install in every shared bank.
    pub quotas: Vec<usize>,
    /// Clear the shadow-tag counters.
    pub reset_shadow: bool,
    /// Tick of the next boundary.
    pub next: Tick,
}

/// Equal split of `assoc` ways over `requesters`, remainder to the lowest ids.
pub fn equal_share(assoc: usize, requesters: usize) -> Vec<usize> {
    let n = requesters.max(1);
    (0..requesters)
        .map(|r| assoc / n + usize::from(r < assoc % n))
        .collect()
}

/// Builds the policy selected by `kind`.
pub fn build_policy(kind: PartitionPolicyKind, threshold: f64) -> Option<Box<dyn PartitionPolicy>> {
    match kind {
        PartitionPolicyKind::None => None,
        PartitionPolicyKind::UcpExhaustive => Some(Box::new(UcpExhaustive)),
        PartitionPolicyKind::UcpLookahead => Some(Box::new(UcpLookahead)),
        PartitionPolicyKind::Mtp => Some(Box::new(Mtp::new(threshold))),
    }
}

/// Epoch-driven partitioning state machine.
pub struct PartitionController {
    policy: Box<dyn PartitionPolicy>,
    phase: Phase,
    epoch: Tick,
    warmup: Tick,
    requesters: usize,
    assoc: usize,
    rotation: Vec<Vec<usize>>,
    position: usize,
    allocation_trace: Option<BufWriter<File>>,
    curve_trace: Option<BufWriter<File>>,
    stats: PartitionStats,
}

impl std::fmt::Debug for PartitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionController")
            .field("policy", &self.policy.name())
            .field("phase", &self.phase)
            .field("rotation", &self.rotation)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl PartitionController {
    /// Creates a controller in the measuring phase.
    ///
    /// # Arguments
    ///
    /// * `config` - Partitioning configuration; trace files are created here.
    /// * `requesters` - Number of requesters sharing the cache.
    /// * `assoc` - Associativity of the shared cache.
    ///
    /// # Returns
    ///
    /// `None` when no policy is configured.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for too few ways, [`SimError::Io`] if a trace file cannot be
    /// created.
    pub fn new(config: &PartitionConfig, requesters: usize, assoc: usize) -> SimResult<Option<Self>> {
        let Some(policy) = build_policy(config.policy, config.mtp_threshold) else {
            return Ok(None);
        };
        Self::with_policy(policy, config, requesters, assoc).map(Some)
    }

    /// Creates a controller around an explicit policy.
    pub fn with_policy(
        policy: Box<dyn PartitionPolicy>,
        config: &PartitionConfig,
        requesters: usize,
        assoc: usize,
    ) -> SimResult<Self> {
        if requesters == 0 || assoc < requesters {
            return Err(SimError::config(
                "partitioning",
                format!("{assoc} ways cannot give {requesters} requesters one way each"),
            ));
        }
        if config.epoch == 0 {
            return Err(SimError::config("partitioning", "epoch must be positive"));
        }
        let mut allocation_trace = config.allocation_trace.as_ref().map(File::create).transpose()?.map(BufWriter::new);
        if let Some(out) = &mut allocation_trace {
            let quotas: Vec<_> = (0..requesters).map(|r| format!("q{r}")).collect();
            writeln!(out, "tick,phase,{}", quotas.join(","))?;
        }
        let mut curve_trace = config.hit_curve_trace.as_ref().map(File::create).transpose()?.map(BufWriter::new);
        if let Some(out) = &mut curve_trace {
            let hits: Vec<_> = (0..assoc).map(|d| format!("h{d}")).collect();
            writeln!(out, "tick,requester,{},misses", hits.join(","))?;
        }
        Ok(Self {
            policy,
            phase: Phase::Measuring,
            epoch: config.epoch,
            warmup: config.warmup,
            requesters,
            assoc,
            rotation: Vec::new(),
            position: 0,
            allocation_trace,
            curve_trace,
            stats: PartitionStats::default(),
        })
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Tick of the first boundary for a run starting at `now`.
    pub const fn first_boundary(&self, now: Tick) -> Tick {
        now + self.warmup
    }

    /// Rotation computed at the end of the last collection phase.
    pub fn rotation(&self) -> &[Vec<usize>] {
        &self.rotation
    }

    fn sub_epoch(&self) -> Tick {
        (self.epoch / self.rotation.len().max(1) as u64).max(1)
    }

    /// Advances the state machine at an epoch boundary.
    ///
    /// # Arguments
    ///
    /// * `now` - Boundary tick.
    /// * `curves` - Hit curves sampled since the last shadow reset, one per requester.
    ///
    /// # Errors
    ///
    /// [`SimError::Io`] if a trace line cannot be written, [`SimError::Invariant`] if the
    /// policy returns a malformed partition.
    pub fn on_epoch(&mut self, now: Tick, curves: &[HitCurve]) -> SimResult<EpochAction> {
        let action = match self.phase {
            Phase::Measuring => self.begin_collect(now),
            Phase::Collect => {
                self.stats.epochs += 1;
                self.trace_curves(now, curves)?;
                let rotation = self.policy.compute(curves, self.assoc);
                self.check(&rotation)?;
                debug!(policy = self.policy.name(), ?rotation, "partition rotation computed");
                self.rotation = rotation;
                self.position = 0;
                self.phase = Phase::Enforce;
                EpochAction {
                    quotas: self.rotation[0].clone(),
                    reset_shadow: false,
                    next: now + self.sub_epoch(),
                }
            }
            Phase::Enforce => {
                self.position += 1;
                if self.position < self.rotation.len() {
                    EpochAction {
                        quotas: self.rotation[self.position].clone(),
                        reset_shadow: false,
                        next: now + self.sub_epoch(),
                    }
                } else {
                    self.begin_collect(now)
                }
            }
        };
        self.stats.repartitions += 1;
        self.stats.current = Some(action.quotas.clone());
        if let Some(out) = &mut self.allocation_trace {
            let quotas: Vec<_> = action.quotas.iter().map(usize::to_string).collect();
            writeln!(out, "{now},{},{}", self.phase.code(), quotas.join(","))?;
            out.flush()?;
        }
        Ok(action)
    }

    fn begin_collect(&mut self, now: Tick) -> EpochAction {
        debug!(now, "partition collection phase");
        self.phase = Phase::Collect;
        EpochAction {
            quotas: equal_share(self.assoc, self.requesters),
            reset_shadow: true,
            next: now + self.epoch,
        }
    }

    fn check(&self, rotation: &[Vec<usize>]) -> SimResult<()> {
        let bad = rotation.is_empty()
            || rotation.iter().any(|p| {
                p.len() != self.requesters || p.contains(&0) || p.iter().sum::<usize>() != self.assoc
            });
        if bad {
            return Err(SimError::invariant(
                "partitioning",
                format!("{} produced a malformed rotation {rotation:?}", self.policy.name()),
            ));
        }
        Ok(())
    }

    fn trace_curves(&mut self, now: Tick, curves: &[HitCurve]) -> SimResult<()> {
        let Some(out) = &mut self.curve_trace else {
            return Ok(());
        };
        for (r, curve) in curves.iter().enumerate() {
            let hits: Vec<_> = curve.hits.iter().map(u64::to_string).collect();
            writeln!(out, "{now},{r},{},{}", hits.join(","), curve.misses)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Partitioning counters.
    pub fn stats(&self) -> PartitionStats {
        self.stats.clone()
    }
}
