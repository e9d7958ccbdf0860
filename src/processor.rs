//! Processing element: one core with its cache, request queue and barrier flag

use std::collections::VecDeque;

use log::{debug, info, trace};

use crate::memory::cache::CoherentCache;
use crate::memory::{AccessType, SnoopBus};
use crate::request::{Operation, Request};

/// Address whose writes fold private sums into the public accumulator
pub const PUBLIC_SUM_ADDR: u16 = 0x400;

/// Each core's private address in the generated OpenMP workloads
pub fn private_sum_addr(processor_id: usize) -> u16 {
    (processor_id * 0x100) as u16
}

/// Execution mode flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorePolicy {
    /// Emulate an OpenMP workload: reads feed the private accumulator,
    /// writes store derived values instead of the literal data
    pub omp: bool,
    /// Writes to `PUBLIC_SUM_ADDR` reduce into the public accumulator.
    /// Only effective together with `omp`.
    pub reduction: bool,
}

/// What happened when a core was handed a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Execution {
    BarrierSet,
    Accessed { hit: bool },
    Requeued,
}

pub struct ProcessingElement {
    pub processor_id: usize,
    pub cache: CoherentCache,
    barrier_flag: bool,
    request_queue: VecDeque<Request>,

    pub private_sum: u16,
    pub write_counter: u16,
}

impl ProcessingElement {
    pub fn make(processor_id: usize) -> Self {
        Self {
            processor_id,
            cache: CoherentCache::make(processor_id),
            barrier_flag: false,
            request_queue: VecDeque::new(),
            private_sum: 0,
            write_counter: (processor_id * 16) as u16,
        }
    }

    pub fn barrier_flag(&self) -> bool {
        self.barrier_flag
    }

    pub fn clear_barrier(&mut self) {
        self.barrier_flag = false;
    }

    pub fn enqueue(&mut self, request: Request) {
        self.request_queue.push_back(request);
    }

    pub fn dequeue(&mut self) -> Option<Request> {
        self.request_queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.request_queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.request_queue.is_empty()
    }

    /// Ready for arbitration: not stalled on a barrier and has work
    pub fn is_ready(&self) -> bool {
        !self.barrier_flag && !self.request_queue.is_empty()
    }

    /// Value a write actually stores under the given policy
    fn write_value(
        &mut self,
        request: &Request,
        policy: CorePolicy,
        public_sum: &mut u16,
    ) -> u16 {
        if !policy.omp {
            return request.write_data;
        }
        if policy.reduction && request.address == PUBLIC_SUM_ADDR {
            *public_sum = public_sum.wrapping_add(self.private_sum);
            debug!(
                "P{}: reduce {} into public sum -> {}",
                self.processor_id, self.private_sum, *public_sum
            );
            *public_sum
        } else {
            let value = self.private_sum.wrapping_add(self.write_counter);
            self.write_counter = self.write_counter.wrapping_add(1);
            value
        }
    }

    /// Run one arbitrated request to completion
    pub fn execute(
        &mut self,
        request: Request,
        policy: CorePolicy,
        bus: &mut impl SnoopBus,
        public_sum: &mut u16,
    ) -> Execution {
        if request.op == Operation::Barrier {
            self.barrier_flag = true;
            info!("{} (set barrier for P{})", request, self.processor_id);
            trace!("{}", self.cache.dump_state());
            return Execution::BarrierSet;
        }

        // Arbitration never picks a stalled core; kept for callers that bypass it
        if self.barrier_flag {
            self.request_queue.push_back(request);
            debug!("Queued {} (barrier active for P{})", request, self.processor_id);
            return Execution::Requeued;
        }

        let address = request.address;
        let outcome = match request.op {
            Operation::Read => {
                let outcome =
                    self.cache.local_access(address, AccessType::Read, 0, bus);
                if policy.omp {
                    self.private_sum = outcome.read_data.unwrap_or(0);
                }
                outcome
            }
            _ => {
                let value = self.write_value(&request, policy, public_sum);
                self.cache.local_access(address, AccessType::Write, value, bus)
            }
        };

        debug!(
            "Processing {} (P{}, type {}, {})",
            request,
            self.processor_id,
            request.op,
            if outcome.hit { "hit" } else { "miss" }
        );
        trace!("{}", self.cache.dump_state());
        Execution::Accessed { hit: outcome.hit }
    }
}
