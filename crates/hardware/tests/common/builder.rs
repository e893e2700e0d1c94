//! Fluent builders for test configurations and requests.

use memsim_core::config::{
    CoherenceKind, Config, InterconnectKind, MissHandlingKind, PartitionPolicyKind, SchedulerKind,
};
use memsim_core::request::{Holder, MemCmd, MemRequest, ReqId, RequestArena};
use memsim_core::PhysAddr;

/// Builds small configurations that keep scenario tests short.
///
/// The defaults describe a two-core system with 1 KiB two-way L1s, a 4 KiB four-way
/// single-bank L2 and short, round DRAM timings.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.system.cores = 2;
        config.l1.size_bytes = 1024;
        config.l1.assoc = 2;
        config.l1.mshrs = 4;
        config.l1.write_buffers = 4;
        config.l2.size_bytes = 4096;
        config.l2.assoc = 4;
        config.l2.banks = 1;
        config.l2.mshrs = 8;
        config.l2.write_buffers = 8;
        config.memory.t_cas = 10;
        config.memory.t_ras = 10;
        config.memory.t_pre = 10;
        Self { config }
    }

    pub fn cores(mut self, cores: usize) -> Self {
        self.config.system.cores = cores;
        self
    }

    pub fn l1_mshrs(mut self, mshrs: usize, max_targets: usize) -> Self {
        self.config.l1.mshrs = mshrs;
        self.config.l1.max_targets = max_targets;
        self
    }

    pub fn l1_write_buffers(mut self, n: usize) -> Self {
        self.config.l1.write_buffers = n;
        self
    }

    pub fn l1_geometry(mut self, size: u64, assoc: usize) -> Self {
        self.config.l1.size_bytes = size;
        self.config.l1.assoc = assoc;
        self
    }

    pub fn l1_blocking(mut self) -> Self {
        self.config.l1.miss_handling = MissHandlingKind::Blocking;
        self.config.l1.max_targets = 1;
        self
    }

    pub fn directory(mut self) -> Self {
        self.config.l1.coherence = CoherenceKind::Directory;
        self
    }

    pub fn l2_banks(mut self, banks: usize) -> Self {
        self.config.l2.banks = banks;
        self.config.l2.size_bytes = 4096 * banks as u64;
        self
    }

    pub fn l2_geometry(mut self, size: u64, assoc: usize) -> Self {
        self.config.l2.size_bytes = size;
        self.config.l2.assoc = assoc;
        self
    }

    pub fn interconnect(mut self, kind: InterconnectKind) -> Self {
        self.config.interconnect.kind = kind;
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.config.memory.scheduler = kind;
        self
    }

    pub fn partitioning(mut self, policy: PartitionPolicyKind, warmup: u64, epoch: u64) -> Self {
        self.config.partitioning.policy = policy;
        self.config.partitioning.warmup = warmup;
        self.config.partitioning.epoch = epoch;
        self.config.partitioning.sample_interval = 1;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Inserts a core read of `addr` owned by its issuer.
pub fn read(arena: &mut RequestArena, addr: u64, requester: usize) -> ReqId {
    arena.insert(
        MemRequest::new(MemCmd::Read, PhysAddr::new(addr), 8, requester, 0),
        Holder::Issuer,
    )
}

/// Inserts a request with an explicit command, held by `holder`.
pub fn request(arena: &mut RequestArena, cmd: MemCmd, addr: u64, requester: usize, holder: Holder) -> ReqId {
    arena.insert(MemRequest::new(cmd, PhysAddr::new(addr), 64, requester, 0), holder)
}
