//! Memory hierarchy simulator CLI.
//!
//! This binary drives a [`MemorySystem`] with synthetic core traffic. It performs:
//! 1. **Configuration:** Loads a JSON configuration, or uses the built-in two-core default.
//! 2. **Traffic:** Issues stream, random or hot-set accesses from every core, keeping a
//!    bounded window of accesses in flight per core.
//! 3. **Reporting:** Prints the requested statistics sections, optionally dumps them as
//!    JSON, and can write or restore cache checkpoints.

use std::path::PathBuf;
use std::{fs, process};

use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use memsim_core::stats::STATS_SECTIONS;
use memsim_core::{Completion, CompletionSink, Config, MemCmd, MemorySystem, PhysAddr, SimResult};

#[derive(Parser, Debug)]
#[command(
    name = "memsim",
    author,
    version,
    about = "Cycle-level multi-core memory hierarchy simulator",
    long_about = "Drive the cache hierarchy, interconnect and DRAM controller with synthetic traffic.\n\nExamples:\n  memsim --pattern stream --accesses 10000\n  memsim -c configs/nfq.json --pattern hot-set --stats memory --stats partition\n  memsim -c configs/quad.json --stats-json out/stats.json --checkpoint-dir out/ckpt"
)]
struct Cli {
    /// JSON configuration file; defaults are used for every missing field.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address pattern of the synthetic traffic.
    #[arg(short, long, value_enum, default_value_t = Pattern::Stream)]
    pattern: Pattern,

    /// Accesses issued by each core.
    #[arg(short = 'n', long, default_value_t = 10_000)]
    accesses: u64,

    /// Accesses each core keeps in flight.
    #[arg(short, long, default_value_t = 4)]
    window: usize,

    /// Ticks between issue opportunities of a core.
    #[arg(long, default_value_t = 1)]
    interval: u64,

    /// Percentage of accesses that are stores.
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u8).range(0..=100))]
    write_percent: u8,

    /// Bytes of address space touched by each core.
    #[arg(long, default_value_t = 1 << 20)]
    footprint: u64,

    /// Seed of the address generator.
    #[arg(long, default_value_t = 0x2545_f491_4f6c_dd1d)]
    seed: u64,

    /// Statistics sections to print (repeatable); all sections when omitted.
    #[arg(long = "stats", value_parser = clap::builder::PossibleValuesParser::new(STATS_SECTIONS.iter().copied()))]
    sections: Vec<String>,

    /// Write the statistics as JSON to this file.
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Write the cache contents here after the run.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Restore the cache contents from here before the run.
    #[arg(long)]
    restore_dir: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    dump_config: bool,
}

/// Synthetic address pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Pattern {
    /// Sequential blocks through a private region.
    Stream,
    /// Uniformly random blocks in a private region.
    Random,
    /// Mostly a small set of blocks shared by all cores, otherwise random.
    HotSet,
}

/// Blocks in the shared hot set.
const HOT_BLOCKS: u64 = 64;

/// Per-core address generator.
#[derive(Debug)]
struct Traffic {
    pattern: Pattern,
    state: u64,
    base: u64,
    blocks: u64,
    block_size: u64,
    cursor: u64,
    write_percent: u64,
}

impl Traffic {
    fn new(cli: &Cli, core: usize, block_size: u64) -> Self {
        let blocks = (cli.footprint / block_size).max(1);
        // The hot set sits below every private region.
        let base = (HOT_BLOCKS + blocks * core as u64) * block_size;
        Self {
            pattern: cli.pattern,
            state: (cli.seed ^ (core as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)).max(1),
            base,
            blocks,
            block_size,
            cursor: 0,
            write_percent: u64::from(cli.write_percent),
        }
    }

    /// xorshift64
    const fn next_random(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_access(&mut self) -> (MemCmd, PhysAddr) {
        let addr = match self.pattern {
            Pattern::Stream => {
                let block = self.cursor % self.blocks;
                self.cursor += 1;
                self.base + block * self.block_size
            }
            Pattern::Random => self.base + (self.next_random() % self.blocks) * self.block_size,
            Pattern::HotSet => {
                if self.next_random() % 10 < 9 {
                    (self.next_random() % HOT_BLOCKS) * self.block_size
                } else {
                    self.base + (self.next_random() % self.blocks) * self.block_size
                }
            }
        };
        let cmd = if self.next_random() % 100 < self.write_percent {
            MemCmd::Write
        } else {
            MemCmd::Read
        };
        (cmd, PhysAddr::new(addr))
    }
}

/// Tracks the accesses each core has in flight.
#[derive(Debug)]
struct InFlight {
    per_core: Vec<usize>,
    completed: u64,
}

impl CompletionSink for InFlight {
    fn complete(&mut self, completion: Completion) {
        if let Some(n) = self.per_core.get_mut(completion.core) {
            *n = n.saturating_sub(1);
        }
        self.completed += 1;
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("\n[!] FATAL: {e}");
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> SimResult<Config> {
    match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Config::from_json(&json)
        }
        None => Ok(Config::default()),
    }
}

/// Runs the whole simulation described by `cli`.
///
/// # Errors
///
/// Configuration, I/O and fatal simulation errors.
fn run(cli: &Cli) -> SimResult<()> {
    let config = load_config(cli)?;
    if cli.dump_config {
        println!("{}", serde_json::to_string_pretty(&config).map_err(std::io::Error::from)?);
        return Ok(());
    }

    let mut system = MemorySystem::new(&config)?;
    if let Some(dir) = &cli.restore_dir {
        let restored = system.restore(dir)?;
        info!(dir = %dir.display(), restored, "checkpoint restored");
    }

    let cores = system.num_cores();
    let mut traffic: Vec<Traffic> = (0..cores)
        .map(|core| Traffic::new(cli, core, config.l1.block_size))
        .collect();
    let mut remaining = vec![cli.accesses; cores];
    let mut sink = InFlight {
        per_core: vec![0; cores],
        completed: 0,
    };
    let window = cli.window.max(1);
    let interval = cli.interval.max(1);

    println!(
        "[*] {cores} cores, {} L2 banks, pattern {:?}, {} accesses per core",
        config.l2.banks, cli.pattern, cli.accesses
    );

    while remaining.iter().any(|&r| r > 0) {
        for core in 0..cores {
            while remaining[core] > 0 && sink.per_core[core] < window {
                let (cmd, addr) = traffic[core].next_access();
                let _ = system.issue(core, cmd, addr, 8)?;
                sink.per_core[core] += 1;
                remaining[core] -= 1;
            }
        }
        let next = system.now() + interval;
        system.run_until(next, &mut sink)?;
    }
    system.drain(&mut sink)?;
    debug!(completed = sink.completed, ticks = system.now(), "traffic drained");

    let stats = system.stats();
    stats.print_sections(&cli.sections);

    if let Some(path) = &cli.stats_json {
        let json = stats.to_json().map_err(std::io::Error::from)?;
        fs::write(path, json)?;
        println!("[*] Statistics written to {}", path.display());
    }
    if let Some(dir) = &cli.checkpoint_dir {
        fs::create_dir_all(dir)?;
        let files = system.checkpoint(dir)?;
        println!("[*] Checkpoint: {} files in {}", files.len(), dir.display());
    }
    Ok(())
}
