//! A simulator wrapper: trace loading, cycle loop and queue drain

use std::path::Path;

use log::{debug, info};

use crate::bus::{Interconnect, DEFAULT_CORE_NUM};
use crate::error::{ExecutionError, SimulatorResult};
use crate::memory::cache::CacheHistory;
use crate::processor::CorePolicy;
use crate::request::{parse_trace_line, Request};

/// Outcome of a complete run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    /// Cycles driven by trace lines
    pub trace_cycles: usize,
    /// Extra empty cycles needed to drain the queues
    pub drain_cycles: usize,
    pub histories: Vec<CacheHistory>,
    pub public_sum: u16,
}

impl RunStats {
    pub fn total_cycles(&self) -> usize {
        self.trace_cycles + self.drain_cycles
    }
}

/// Parse trace text into one batch per line
pub fn parse_batches(
    content: &str,
    core_num: usize,
) -> SimulatorResult<Vec<Vec<Request>>> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            parse_trace_line(line, i + 1, core_num).map_err(Into::into)
        })
        .collect()
}

/// Fetch request batches from the trace file
pub fn fetch_batches(
    trace_path: impl AsRef<Path>,
    core_num: usize,
) -> SimulatorResult<Vec<Vec<Request>>> {
    let content = std::fs::read_to_string(trace_path)?;
    parse_batches(&content, core_num)
}

/// Drive the batches through the bus, then drain every queue
pub fn run_batches(
    bus: &mut Interconnect,
    batches: &[Vec<Request>],
    policy: CorePolicy,
) -> SimulatorResult<RunStats> {
    let mut cycle = 0;
    for batch in batches {
        info!("---------- Cycle {} ----------", cycle);
        cycle += 1;
        // Lines with nothing to issue do not advance the queues
        if batch.is_empty() {
            continue;
        }
        bus.arbitrate_cycle(batch, policy);
    }
    let trace_cycles = cycle;

    while !bus.is_drained() {
        info!("---------- Cycle {} (drain) ----------", cycle);
        let report = bus.arbitrate_cycle(&[], policy);
        if !report.made_progress() {
            return Err(ExecutionError::BarrierDeadlock {
                cycle,
                pending: bus.pending_requests(),
            }
            .into());
        }
        cycle += 1;
    }

    for core in bus.cores() {
        debug!("{}", core.cache.dump_state());
    }
    debug!("{}", bus.memory().dump(0, 10));

    Ok(RunStats {
        trace_cycles,
        drain_cycles: cycle - trace_cycles,
        histories: bus.cores().iter().map(|core| core.cache.history).collect(),
        public_sum: bus.public_sum(),
    })
}

/// Run the four-core system on the given trace file and audit coherence
/// afterwards. `priorities` must hold one entry per core.
pub fn run_trace(
    trace_path: impl AsRef<Path>,
    priorities: Vec<i32>,
    policy: CorePolicy,
) -> SimulatorResult<RunStats> {
    let mut bus = Interconnect::make(DEFAULT_CORE_NUM, priorities)?;
    let batches = fetch_batches(trace_path, bus.core_num())?;
    let stats = run_batches(&mut bus, &batches, policy)?;
    bus.verify_coherence()?;
    Ok(stats)
}
