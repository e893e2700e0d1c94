//! Memory system harness.

use memsim_core::config::Config;
use memsim_core::request::{MemCmd, ReqId};
use memsim_core::{Completion, MemorySystem, PhysAddr, Tick};

/// A memory system plus the completions it has reported.
#[derive(Debug)]
pub struct TestSystem {
    pub system: MemorySystem,
    pub done: Vec<Completion>,
}

impl TestSystem {
    pub fn new(config: &Config) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        Self {
            system: MemorySystem::new(config).unwrap(),
            done: Vec::new(),
        }
    }

    pub fn read(&mut self, core: usize, addr: u64) -> ReqId {
        self.system
            .issue(core, MemCmd::Read, PhysAddr::new(addr), 8)
            .unwrap()
    }

    pub fn write(&mut self, core: usize, addr: u64) -> ReqId {
        self.system
            .issue(core, MemCmd::Write, PhysAddr::new(addr), 8)
            .unwrap()
    }

    /// Runs until every outstanding access has completed.
    pub fn drain(&mut self) {
        self.system.drain(&mut self.done).unwrap();
    }

    pub fn run_until(&mut self, tick: Tick) {
        self.system.run_until(tick, &mut self.done).unwrap();
    }

    /// Completion of `req`, if it has been reported.
    pub fn completion(&self, req: ReqId) -> Option<&Completion> {
        self.done.iter().find(|c| c.req == req)
    }

    /// Issues a read, drains, and returns its latency.
    pub fn timed_read(&mut self, core: usize, addr: u64) -> Tick {
        let req = self.read(core, addr);
        self.drain();
        self.completion(req).unwrap().latency()
    }
}
