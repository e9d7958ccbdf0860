//! Shared snooping bus.
//!
//! The interconnect is also the simulation context: it owns every core,
//! the backing store, the priority vector and the public accumulator.
//! Caches reach their peers through a borrowed [`Peers`] view built per
//! access, so no component holds a reference to another.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::{CoherenceError, SimulatorError, SimulatorResult};
use crate::memory::backing::BackingStore;
use crate::memory::{
    get_block_address, BusRequest, MesiState, SnoopBus, SnoopResponse, ASSOCIATIVITY,
    SET_NUM,
};
use crate::processor::{CorePolicy, Execution, ProcessingElement};
use crate::request::Request;

pub const DEFAULT_CORE_NUM: usize = 4;

/// Every core except the one issuing the access, plus the backing store
pub struct Peers<'a> {
    before: &'a mut [ProcessingElement],
    after: &'a mut [ProcessingElement],
    memory: &'a mut BackingStore,
}

impl SnoopBus for Peers<'_> {
    /// Snoop peers in ascending processor id. A read miss stops at the
    /// first peer that supplies the block.
    fn broadcast(
        &mut self,
        request: BusRequest,
        address: u16,
        source_id: usize,
    ) -> SnoopResponse {
        let mut response = SnoopResponse::default();
        for core in self.before.iter_mut().chain(self.after.iter_mut()) {
            if core.processor_id == source_id {
                continue;
            }
            let answer =
                core.cache.handle_snoop(request, address, source_id, self.memory);
            response.data = answer.data;
            response.shared |= answer.shared;
            if request == BusRequest::ReadMiss && response.shared {
                break;
            }
        }
        response
    }

    fn memory(&mut self) -> &mut BackingStore {
        &mut *self.memory
    }
}

/// Split the cores around `id`: the core itself and a view of the rest
fn split_peers<'a>(
    cores: &'a mut [ProcessingElement],
    memory: &'a mut BackingStore,
    id: usize,
) -> (Option<&'a mut ProcessingElement>, Peers<'a>) {
    if id >= cores.len() {
        return (None, Peers { before: cores, after: &mut [], memory });
    }
    let (before, rest) = cores.split_at_mut(id);
    let (core, after) = rest.split_at_mut(1);
    (core.first_mut(), Peers { before, after, memory })
}

/// Summary of one arbitration cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub executed: usize,
    pub released: bool,
}

impl CycleReport {
    /// Whether the cycle changed any core's state
    pub fn made_progress(&self) -> bool {
        self.executed > 0 || self.released
    }
}

pub struct Interconnect {
    cores: Vec<ProcessingElement>,
    memory: BackingStore,
    priorities: Vec<i32>,
    public_sum: u16,
}

impl Default for Interconnect {
    /// Four cores, core 0 with the highest precedence
    fn default() -> Self {
        Self {
            cores: (0..DEFAULT_CORE_NUM).map(ProcessingElement::make).collect(),
            memory: BackingStore::make(),
            priorities: (0..DEFAULT_CORE_NUM as i32).collect(),
            public_sum: 0,
        }
    }
}

impl Interconnect {
    pub fn make(core_num: usize, priorities: Vec<i32>) -> SimulatorResult<Self> {
        if core_num == 0 {
            return Err(SimulatorError::ConfigError(
                "at least one core is required".into(),
            ));
        }
        Self::check_priorities(core_num, &priorities)?;
        Ok(Self {
            cores: (0..core_num).map(ProcessingElement::make).collect(),
            memory: BackingStore::make(),
            priorities,
            public_sum: 0,
        })
    }

    fn check_priorities(core_num: usize, priorities: &[i32]) -> SimulatorResult<()> {
        if priorities.len() != core_num {
            return Err(SimulatorError::ConfigError(format!(
                "priority list size {} must match number of cores {}",
                priorities.len(),
                core_num
            )));
        }
        Ok(())
    }

    pub fn set_priorities(&mut self, priorities: Vec<i32>) -> SimulatorResult<()> {
        Self::check_priorities(self.cores.len(), &priorities)?;
        self.priorities = priorities;
        Ok(())
    }

    pub fn priorities(&self) -> &[i32] {
        &self.priorities
    }

    pub fn core_num(&self) -> usize {
        self.cores.len()
    }

    pub fn cores(&self) -> &[ProcessingElement] {
        &self.cores
    }

    pub fn core(&self, id: usize) -> &ProcessingElement {
        &self.cores[id]
    }

    pub fn memory(&self) -> &BackingStore {
        &self.memory
    }

    pub fn public_sum(&self) -> u16 {
        self.public_sum
    }

    /// Send a snoop from `source_id` to every other cache
    pub fn broadcast_snoop(
        &mut self,
        request: BusRequest,
        address: u16,
        source_id: usize,
    ) -> SnoopResponse {
        let (_, mut peers) =
            split_peers(&mut self.cores, &mut self.memory, source_id);
        peers.broadcast(request, address, source_id)
    }

    /// Hand one request to its core, bypassing arbitration
    pub fn execute(
        &mut self,
        request: Request,
        policy: CorePolicy,
    ) -> Option<Execution> {
        let (core, mut peers) =
            split_peers(&mut self.cores, &mut self.memory, request.processor_id);
        let core = core?;
        Some(core.execute(request, policy, &mut peers, &mut self.public_sum))
    }

    /// Order the ready set: barriers, then writes, then reads;
    /// ties broken by ascending priority value
    pub fn sort_ready(&self, ready: &mut [Request]) {
        ready.sort_by_key(|request| {
            (request.op.class_rank(), self.priorities[request.processor_id])
        });
    }

    pub fn all_barriers_set(&self) -> bool {
        self.cores.iter().all(|core| core.barrier_flag())
    }

    /// Number of requests still waiting in any queue
    pub fn pending_requests(&self) -> usize {
        self.cores.iter().map(|core| core.queue_len()).sum()
    }

    pub fn is_drained(&self) -> bool {
        self.cores.iter().all(|core| core.is_queue_empty())
    }

    /// Run one simulated cycle on the given batch of requests
    pub fn arbitrate_cycle(
        &mut self,
        batch: &[Request],
        policy: CorePolicy,
    ) -> CycleReport {
        for request in batch {
            let Some(core) = self.cores.get_mut(request.processor_id) else {
                warn!("Dropping {}: no such processor", request);
                continue;
            };
            core.enqueue(*request);
            if core.barrier_flag() || core.queue_len() > 1 {
                debug!(
                    "Enqueued {} (priority {}, type {})",
                    request, self.priorities[request.processor_id], request.op
                );
            }
        }

        let mut ready: Vec<Request> = self
            .cores
            .iter_mut()
            .filter(|core| core.is_ready())
            .filter_map(|core| core.dequeue())
            .collect();
        self.sort_ready(&mut ready);

        let mut report = CycleReport::default();
        for request in ready {
            if self.execute(request, policy).is_some() {
                report.executed += 1;
            }
        }

        if self.all_barriers_set() {
            info!("All barriers set, clearing barriers");
            for core in self.cores.iter_mut() {
                core.clear_barrier();
            }
            report.released = true;
        }
        report
    }

    /// Check the single-writer invariant across all caches
    pub fn verify_coherence(&self) -> SimulatorResult<()> {
        for index in 0..SET_NUM {
            // tag -> (core, state) of every valid copy
            let mut holders: BTreeMap<u16, Vec<(usize, MesiState)>> =
                BTreeMap::new();
            for core in &self.cores {
                for way in 0..ASSOCIATIVITY {
                    let block = core.cache.block(index, way);
                    if block.state.is_valid() {
                        holders
                            .entry(block.tag)
                            .or_default()
                            .push((core.processor_id, block.state));
                    }
                }
            }

            for (tag, copies) in holders {
                let address = get_block_address(tag, index);
                let writers: Vec<usize> = copies
                    .iter()
                    .filter(|(_, state)| *state == MesiState::Modified)
                    .map(|(id, _)| *id)
                    .collect();
                if writers.len() > 1 {
                    return Err(CoherenceError::MultipleWriters {
                        address,
                        cores: writers,
                    }
                    .into());
                }

                let owner = copies.iter().find(|(_, state)| {
                    matches!(state, MesiState::Modified | MesiState::Exclusive)
                });
                if let Some(&(owner, state)) = owner {
                    let others: Vec<usize> = copies
                        .iter()
                        .map(|(id, _)| *id)
                        .filter(|id| *id != owner)
                        .collect();
                    if !others.is_empty() {
                        return Err(CoherenceError::StaleCopy {
                            address,
                            owner,
                            state: state.letter(),
                            others,
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Operation;

    const PLAIN: CorePolicy = CorePolicy { omp: false, reduction: false };

    fn read_word(bus: &Interconnect, id: usize, address: u16) -> Option<u16> {
        let cache = &bus.core(id).cache;
        let way = cache.lookup(address)?;
        let block = cache.block(crate::memory::get_index(address), way);
        Some(block.read_half(crate::memory::get_offset(address)))
    }

    #[test]
    fn test_make_rejects_mismatched_priorities() {
        assert!(matches!(
            Interconnect::make(4, vec![0, 1, 2]),
            Err(SimulatorError::ConfigError(_))
        ));
        assert!(matches!(
            Interconnect::make(0, vec![]),
            Err(SimulatorError::ConfigError(_))
        ));
        assert!(Interconnect::make(2, vec![1, 0]).is_ok());

        let mut bus = Interconnect::default();
        assert!(bus.set_priorities(vec![0; 5]).is_err());
        assert_eq!(bus.priorities(), &[0, 1, 2, 3]);
        bus.set_priorities(vec![3, 2, 1, 0]).unwrap();
        assert_eq!(bus.priorities(), &[3, 2, 1, 0]);
    }

    #[test]
    fn test_scenarios_a_b_c() {
        let mut bus = Interconnect::default();

        // A: cold write miss
        bus.arbitrate_cycle(&[Request::write(0, 0x20, 7)], PLAIN);
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Modified);
        assert_eq!(read_word(&bus, 0, 0x20), Some(7));
        assert_eq!(bus.memory().read_block(0x20), 0);
        assert_eq!(bus.core(0).cache.history.write_misses, 1);

        // B: peer read pulls the block over and downgrades the owner
        bus.arbitrate_cycle(&[Request::read(1, 0x20)], PLAIN);
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Shared);
        assert_eq!(bus.core(1).cache.state_of(0x20), MesiState::Shared);
        assert_eq!(read_word(&bus, 0, 0x20), Some(7));
        assert_eq!(read_word(&bus, 1, 0x20), Some(7));
        assert_eq!(bus.memory().read_block(0x20), 7);

        // C: upgrade from Shared invalidates the other copy
        bus.arbitrate_cycle(&[Request::write(0, 0x20, 9)], PLAIN);
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Modified);
        assert_eq!(bus.core(1).cache.state_of(0x20), MesiState::Invalid);
        assert_eq!(read_word(&bus, 0, 0x20), Some(9));

        bus.verify_coherence().unwrap();
    }

    #[test]
    fn test_read_of_exclusive_line_is_shared() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::read(2, 0x84)], PLAIN);
        assert_eq!(bus.core(2).cache.state_of(0x84), MesiState::Exclusive);

        bus.arbitrate_cycle(&[Request::read(3, 0x84)], PLAIN);
        assert_eq!(bus.core(2).cache.state_of(0x84), MesiState::Shared);
        assert_eq!(bus.core(3).cache.state_of(0x84), MesiState::Shared);
    }

    #[test]
    fn test_read_miss_broadcast_stops_at_first_sharer() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::read(1, 0x20)], PLAIN);
        bus.arbitrate_cycle(&[Request::read(2, 0x20)], PLAIN);

        let response = bus.broadcast_snoop(BusRequest::ReadMiss, 0x20, 0);
        assert!(response.shared);
        assert_eq!(bus.core(1).cache.state_of(0x20), MesiState::Shared);
        assert_eq!(bus.core(2).cache.state_of(0x20), MesiState::Shared);
    }

    #[test]
    fn test_write_miss_invalidates_every_peer() {
        let mut bus = Interconnect::default();
        for id in 1..4 {
            bus.arbitrate_cycle(&[Request::read(id, 0x20)], PLAIN);
        }
        bus.arbitrate_cycle(&[Request::write(0, 0x20, 1)], PLAIN);
        for id in 1..4 {
            assert_eq!(bus.core(id).cache.state_of(0x20), MesiState::Invalid);
        }
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Modified);
        bus.verify_coherence().unwrap();
    }

    #[test]
    fn test_snoop_invalidation_flushes_modified_peer() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::write(3, 0x1F0, 0xBEEF)], PLAIN);
        bus.arbitrate_cycle(&[Request::write(1, 0x1F1, 1)], PLAIN);

        assert_eq!(bus.core(3).cache.state_of(0x1F0), MesiState::Invalid);
        assert_eq!(bus.memory().read_block(0x1F0), 0xBEEF);
        // Filled from the flushed block, then the upper half-word written
        assert_eq!(read_word(&bus, 1, 0x1F0), Some(0xBEEF));
        assert_eq!(read_word(&bus, 1, 0x1F1), Some(1));
    }

    #[test]
    fn test_aliased_snoop_flushes_to_block_address() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::write(0, 0x0021, 0x1234)], PLAIN);
        // Bits 13-15 are outside the tag, so 0xE020 is the same block
        bus.arbitrate_cycle(&[Request::write(1, 0xE020, 5)], PLAIN);

        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Invalid);
        assert_eq!(bus.memory().read_block(0x20), 0x1234_0000);
        assert_eq!(read_word(&bus, 1, 0x20), Some(5));
        assert_eq!(read_word(&bus, 1, 0x21), Some(0x1234));
        bus.verify_coherence().unwrap();
    }

    #[test]
    fn test_aliased_miss_fills_from_block_address() {
        let mut bus = Interconnect::default();
        // Three tags in set 0 push 0x60 out of P0's cache
        bus.arbitrate_cycle(&[Request::write(0, 0x61, 7)], PLAIN);
        bus.arbitrate_cycle(&[Request::write(0, 0x80, 1)], PLAIN);
        bus.arbitrate_cycle(&[Request::write(0, 0xA0, 2)], PLAIN);
        assert_eq!(bus.core(0).cache.state_of(0x60), MesiState::Invalid);
        assert_eq!(bus.memory().read_block(0x60), 0x0007_0000);

        bus.arbitrate_cycle(&[Request::read(1, 0xE061)], PLAIN);
        assert_eq!(bus.core(1).cache.state_of(0x60), MesiState::Exclusive);
        assert_eq!(read_word(&bus, 1, 0x61), Some(7));
    }

    #[test]
    fn test_sort_ready() {
        let mut bus = Interconnect::default();
        let mut ready = vec![
            Request::read(0, 0),
            Request::write(3, 0, 0),
            Request::read(2, 0),
            Request::barrier(1),
            Request::write(1, 0, 0),
            Request::barrier(2),
        ];
        bus.sort_ready(&mut ready);
        let order: Vec<(Operation, usize)> =
            ready.iter().map(|r| (r.op, r.processor_id)).collect();
        assert_eq!(
            order,
            vec![
                (Operation::Barrier, 1),
                (Operation::Barrier, 2),
                (Operation::Write, 1),
                (Operation::Write, 3),
                (Operation::Read, 0),
                (Operation::Read, 2),
            ]
        );

        bus.set_priorities(vec![3, 2, 1, 0]).unwrap();
        bus.sort_ready(&mut ready);
        assert_eq!(ready[0], Request::barrier(2));
        assert_eq!(ready[2], Request::write(3, 0, 0));
        assert_eq!(ready[4], Request::read(2, 0));
    }

    #[test]
    fn test_execution_follows_arbitration_order() {
        let mut bus = Interconnect::default();
        // Two writers to one block: the lower-precedence core executes last
        // and ends up the sole owner
        bus.arbitrate_cycle(
            &[Request::write(0, 0x20, 1), Request::write(2, 0x20, 2)],
            PLAIN,
        );
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Invalid);
        assert_eq!(read_word(&bus, 2, 0x20), Some(2));

        bus.set_priorities(vec![0, 1, 3, 2]).unwrap();
        bus.arbitrate_cycle(
            &[Request::write(2, 0x40, 1), Request::write(3, 0x40, 2)],
            PLAIN,
        );
        assert_eq!(bus.core(2).cache.state_of(0x40), MesiState::Modified);
        assert_eq!(bus.core(3).cache.state_of(0x40), MesiState::Invalid);

        // Reads run after writes in the same cycle
        bus.arbitrate_cycle(
            &[Request::read(0, 0x60), Request::write(1, 0x60, 5)],
            PLAIN,
        );
        assert_eq!(read_word(&bus, 0, 0x60), Some(5));
        assert_eq!(bus.core(1).cache.state_of(0x60), MesiState::Shared);
    }

    #[test]
    fn test_one_request_per_core_per_cycle() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(
            &[Request::write(0, 0x20, 1), Request::write(0, 0x24, 2)],
            PLAIN,
        );
        assert_eq!(bus.pending_requests(), 1);
        let report = bus.arbitrate_cycle(&[], PLAIN);
        assert_eq!(report.executed, 1);
        assert!(bus.is_drained());
        assert_eq!(read_word(&bus, 0, 0x24), Some(2));
    }

    #[test]
    fn test_scenario_d_global_barrier() {
        let mut bus = Interconnect::default();
        let barriers: Vec<Request> = (0..4).map(Request::barrier).collect();
        let report = bus.arbitrate_cycle(&barriers, PLAIN);
        assert_eq!(report, CycleReport { executed: 4, released: true });
        assert!(bus.cores().iter().all(|core| !core.barrier_flag()));
    }

    #[test]
    fn test_barrier_stalls_until_everyone_arrives() {
        let mut bus = Interconnect::default();
        let report = bus.arbitrate_cycle(&[Request::barrier(0)], PLAIN);
        assert!(!report.released);
        assert!(bus.core(0).barrier_flag());

        // Core 0 is stalled: its write queues up behind the barrier
        let report = bus.arbitrate_cycle(
            &[Request::write(0, 0x20, 1), Request::barrier(1), Request::barrier(2)],
            PLAIN,
        );
        assert_eq!(report, CycleReport { executed: 2, released: false });
        assert_eq!(bus.core(0).queue_len(), 1);
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Invalid);

        let report = bus.arbitrate_cycle(&[Request::barrier(3)], PLAIN);
        assert!(report.released);
        assert!(bus.cores().iter().all(|core| !core.barrier_flag()));
        // Released at the end of the cycle, so the write is still pending
        assert_eq!(bus.core(0).queue_len(), 1);

        let report = bus.arbitrate_cycle(&[], PLAIN);
        assert_eq!(report.executed, 1);
        assert_eq!(bus.core(0).cache.state_of(0x20), MesiState::Modified);
    }

    #[test]
    fn test_request_behind_barrier_runs_next_cycle() {
        let mut bus = Interconnect::default();
        let early: Vec<Request> = (0..3).map(Request::barrier).collect();
        bus.arbitrate_cycle(&early, PLAIN);
        let report = bus.arbitrate_cycle(
            &[Request::barrier(3), Request::write(3, 0x20, 1)],
            PLAIN,
        );
        assert_eq!(report, CycleReport { executed: 1, released: true });
        assert_eq!(bus.core(3).queue_len(), 1);

        let report = bus.arbitrate_cycle(&[], PLAIN);
        assert_eq!(report.executed, 1);
        assert_eq!(bus.core(3).cache.state_of(0x20), MesiState::Modified);
    }

    #[test]
    fn test_requeue_when_bypassing_arbitration() {
        let mut bus = Interconnect::default();
        bus.execute(Request::barrier(1), PLAIN);
        let result = bus.execute(Request::read(1, 0x20), PLAIN);
        assert_eq!(result, Some(Execution::Requeued));
        assert_eq!(bus.core(1).queue_len(), 1);
        assert_eq!(bus.execute(Request::read(9, 0x20), PLAIN), None);
    }

    #[test]
    fn test_drain_stalls_without_progress() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::barrier(0)], PLAIN);
        bus.arbitrate_cycle(&[Request::read(0, 0x20)], PLAIN);
        let report = bus.arbitrate_cycle(&[], PLAIN);
        assert!(!report.made_progress());
        assert_eq!(bus.pending_requests(), 1);
    }

    #[test]
    fn test_scenario_e_reduction() {
        let policy = CorePolicy { omp: true, reduction: true };
        let mut bus = Interconnect::default();
        let private = crate::processor::private_sum_addr;
        let public = crate::processor::PUBLIC_SUM_ADDR;

        for _ in 0..16 {
            let reads: Vec<Request> =
                (0..4).map(|id| Request::read(id, private(id))).collect();
            bus.arbitrate_cycle(&reads, policy);
            let writes: Vec<Request> =
                (0..4).map(|id| Request::write(id, private(id), 0)).collect();
            bus.arbitrate_cycle(&writes, policy);
        }
        // After k writes core i holds k * 16i + k(k-1)/2
        for id in 0..4 {
            let expected = 256 * id as u16 + 120;
            assert_eq!(read_word(&bus, id, private(id)), Some(expected));
            assert_eq!(bus.core(id).write_counter, 16 * id as u16 + 16);
        }

        let barriers: Vec<Request> = (0..4).map(Request::barrier).collect();
        assert!(bus.arbitrate_cycle(&barriers, policy).released);

        for id in 0..4 {
            bus.arbitrate_cycle(&[Request::read(0, private(id))], policy);
            bus.arbitrate_cycle(&[Request::write(0, public, 0)], policy);
        }
        assert_eq!(bus.public_sum(), 120 + 376 + 632 + 888);
        assert_eq!(read_word(&bus, 0, public), Some(2016));
        bus.verify_coherence().unwrap();
    }

    #[test]
    fn test_verify_coherence_flags_stale_copy() {
        let mut bus = Interconnect::default();
        bus.arbitrate_cycle(&[Request::read(0, 0x20), Request::read(1, 0x20)], PLAIN);
        bus.verify_coherence().unwrap();

        // Core 1 writes without snooping, breaking the invariant on purpose
        let mut lone = BackingStore::make();
        let (core, _) = split_peers(&mut bus.cores, &mut lone, 1);
        let core = core.unwrap();
        let mut isolated = Peers {
            before: &mut [],
            after: &mut [],
            memory: &mut bus.memory,
        };
        let write = crate::memory::AccessType::Write;
        core.cache.local_access(0x20, write, 3, &mut isolated);

        assert_eq!(
            bus.verify_coherence().unwrap_err().to_string(),
            "Coherence error: Block 0x0020 is held by core 1 in state M \
             while other cores hold copies [0]"
        );
    }
}
