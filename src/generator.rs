//! Synthetic OpenMP-style trace generation

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::SimulatorResult;
use crate::processor::{private_sum_addr, PUBLIC_SUM_ADDR};
use crate::request::Request;

/// Read-write pairs each core issues in the parallel phase
const ITERATIONS: usize = 16;

/// Per-core request programs for the OpenMP workload.
///
/// Without reduction every core hammers the public address directly.
/// With reduction each core updates its private address, all cores meet
/// at a barrier, and core 0 folds every private value into the public one.
pub fn omp_programs(core_num: usize, reduction: bool) -> Vec<VecDeque<Request>> {
    let mut programs = vec![VecDeque::new(); core_num];
    for (id, program) in programs.iter_mut().enumerate() {
        let address = if reduction {
            private_sum_addr(id)
        } else {
            PUBLIC_SUM_ADDR
        };
        for _ in 0..ITERATIONS {
            program.push_back(Request::read(id, address));
            program.push_back(Request::write(id, address, 0));
        }
    }

    if reduction {
        for (id, program) in programs.iter_mut().enumerate() {
            program.push_back(Request::barrier(id));
        }
        for id in 0..core_num {
            programs[0].push_back(Request::read(0, private_sum_addr(id)));
            programs[0].push_back(Request::write(0, PUBLIC_SUM_ADDR, 0));
        }
    }
    programs
}

/// Interleave the programs into trace lines: each line draws the next
/// request of a random non-empty subset of cores
pub fn interleave(
    mut programs: Vec<VecDeque<Request>>,
    rng: &mut impl Rng,
) -> Vec<String> {
    let core_num = programs.len();
    let mut lines = Vec::new();
    loop {
        let pending: Vec<usize> =
            (0..core_num).filter(|&id| !programs[id].is_empty()).collect();
        if pending.is_empty() {
            break;
        }

        let active_num = rng.gen_range(1..=pending.len());
        let mut slots = vec![String::from("NULL"); core_num];
        for &id in pending.choose_multiple(rng, active_num) {
            if let Some(request) = programs[id].pop_front() {
                slots[id] = request.to_string();
            }
        }
        lines.push(slots.join(";\t") + "\t");
    }
    lines
}

pub fn generate_omp_trace(
    core_num: usize,
    reduction: bool,
    seed: Option<u64>,
) -> Vec<String> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    interleave(omp_programs(core_num, reduction), &mut rng)
}

/// Write a generated trace to `path`, returning the number of lines
pub fn write_omp_trace(
    path: impl AsRef<Path>,
    core_num: usize,
    reduction: bool,
    seed: Option<u64>,
) -> SimulatorResult<usize> {
    let lines = generate_omp_trace(core_num, reduction, seed);
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path.as_ref(), content)?;
    info!("Generated {} ({} lines)", path.as_ref().display(), lines.len());
    Ok(lines.len())
}
