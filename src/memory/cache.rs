//! Per-core cache kept coherent with MESI snooping

use std::fmt::Write;

use log::debug;

use super::backing::BackingStore;
use super::{
    get_block_address, get_index, get_offset, get_tag, AccessType, BusRequest,
    MesiState, SnoopBus, SnoopResponse, ASSOCIATIVITY, SET_NUM,
};

/// One cache line
#[derive(Clone, Copy, Default, Debug)]
pub struct Block {
    pub state: MesiState,
    pub tag: u16,
    pub lru_counter: u32,
    pub data: u32,
}

impl Block {
    /// Read the half-word selected by `offset`.
    /// Only offsets 0 and 1 select a half-word; anything else reads as 0.
    pub fn read_half(&self, offset: usize) -> u16 {
        if offset > 1 {
            return 0;
        }
        (self.data >> (offset * 16)) as u16
    }

    /// Write the half-word selected by `offset`.
    /// Returns false (and leaves the data untouched) for offsets past 1.
    pub fn write_half(&mut self, offset: usize, value: u16) -> bool {
        if offset > 1 {
            return false;
        }
        let shift = offset * 16;
        self.data = (self.data & !(0xFFFF << shift)) | ((value as u32) << shift);
        true
    }

    fn install(&mut self, state: MesiState, tag: u16, lru_counter: u32, data: u32) {
        self.state = state;
        self.tag = tag;
        self.lru_counter = lru_counter;
        self.data = data;
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct CacheHistory {
    pub read_hits: i32,
    pub read_misses: i32,
    pub write_hits: i32,
    pub write_misses: i32,
}

impl CacheHistory {
    pub fn accesses(&self) -> i32 {
        self.read_hits + self.read_misses + self.write_hits + self.write_misses
    }

    pub fn misses(&self) -> i32 {
        self.read_misses + self.write_misses
    }

    /// Computes the current miss rate of the cache
    pub fn miss_rate(&self) -> f64 {
        if self.accesses() == 0 {
            return 0.0;
        }
        self.misses() as f64 / self.accesses() as f64
    }
}

/// Result of a local access
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessOutcome {
    pub hit: bool,
    pub read_data: Option<u16>,
}

/// A 2-way set-associative write-back cache owned by one core
pub struct CoherentCache {
    pub processor_id: usize,
    pub history: CacheHistory,
    sets: [[Block; ASSOCIATIVITY]; SET_NUM],
    access_count: u32,
}

impl CoherentCache {
    pub fn make(processor_id: usize) -> Self {
        Self {
            processor_id,
            history: CacheHistory::default(),
            sets: [[Block::default(); ASSOCIATIVITY]; SET_NUM],
            access_count: 0,
        }
    }

    /// Way holding a valid copy of the address, if any
    pub fn lookup(&self, address: u16) -> Option<usize> {
        let tag = get_tag(address);
        self.sets[get_index(address)]
            .iter()
            .position(|block| block.state.is_valid() && block.tag == tag)
    }

    pub fn block(&self, index: usize, way: usize) -> &Block {
        &self.sets[index][way]
    }

    /// State of the line caching `address` (Invalid if not cached)
    pub fn state_of(&self, address: u16) -> MesiState {
        match self.lookup(address) {
            Some(way) => self.sets[get_index(address)][way].state,
            None => MesiState::Invalid,
        }
    }

    /// Pick the way to fill in the given set: an Invalid way first,
    /// otherwise the least recently used one (ties go to way 0)
    pub fn get_way_to_replace(&self, index: usize) -> usize {
        let set = &self.sets[index];
        if let Some(way) = set.iter().position(|block| !block.state.is_valid()) {
            return way;
        }
        set.iter()
            .enumerate()
            .min_by_key(|(_, block)| block.lru_counter)
            .map(|(way, _)| way)
            .unwrap_or(0)
    }

    /// Serve a read or write from the owning core
    pub fn local_access(
        &mut self,
        address: u16,
        access_type: AccessType,
        write_data: u16,
        bus: &mut impl SnoopBus,
    ) -> AccessOutcome {
        self.access_count += 1;
        let offset = get_offset(address);
        let index = get_index(address);
        let tag = get_tag(address);
        let id = self.processor_id;
        // Aliases above the tag bits share one block in memory too
        let block_address = get_block_address(tag, index);

        if let Some(way) = self.lookup(address) {
            let block = &mut self.sets[index][way];
            block.lru_counter = self.access_count;
            return match access_type {
                AccessType::Read => {
                    self.history.read_hits += 1;
                    AccessOutcome {
                        hit: true,
                        read_data: Some(block.read_half(offset)),
                    }
                }
                AccessType::Write => {
                    if block.state == MesiState::Shared {
                        // Upgrade: peers drop their copies, no data needed
                        bus.broadcast(BusRequest::SetInvalid, address, id);
                        debug!("P{}: upgrade {:#06x} S -> M", id, address);
                    }
                    block.state = MesiState::Modified;
                    block.write_half(offset, write_data);
                    self.history.write_hits += 1;
                    AccessOutcome { hit: true, read_data: None }
                }
            };
        }

        let way = self.get_way_to_replace(index);
        let victim = &mut self.sets[index][way];
        if victim.state == MesiState::Modified {
            let victim_address = get_block_address(victim.tag, index);
            debug!(
                "P{}: evict {:#06x}, write back {:#010x}",
                id, victim_address, victim.data
            );
            bus.memory().write_block(victim_address, victim.data);
        }

        match access_type {
            AccessType::Read => {
                let response = bus.broadcast(BusRequest::ReadMiss, address, id);
                let (state, data) = if response.shared {
                    (MesiState::Shared, response.data)
                } else {
                    (MesiState::Exclusive, bus.memory().read_block(block_address))
                };
                victim.install(state, tag, self.access_count, data);
                debug!("P{}: read miss {:#06x} -> {}", id, address, victim.state);
                self.history.read_misses += 1;
                AccessOutcome {
                    hit: false,
                    read_data: Some(victim.read_half(offset)),
                }
            }
            AccessType::Write => {
                bus.broadcast(BusRequest::WriteMiss, address, id);
                let data = bus.memory().read_block(block_address);
                victim.install(MesiState::Modified, tag, self.access_count, data);
                victim.write_half(offset, write_data);
                debug!("P{}: write miss {:#06x} -> M", id, address);
                self.history.write_misses += 1;
                AccessOutcome { hit: false, read_data: None }
            }
        }
    }

    /// React to a coherence request issued by another cache
    pub fn handle_snoop(
        &mut self,
        request: BusRequest,
        address: u16,
        source_id: usize,
        memory: &mut BackingStore,
    ) -> SnoopResponse {
        if source_id == self.processor_id {
            return SnoopResponse::default();
        }
        let Some(way) = self.lookup(address) else {
            return SnoopResponse::default();
        };

        let id = self.processor_id;
        let index = get_index(address);
        let block = &mut self.sets[index][way];
        let previous = block.state;
        if previous == MesiState::Modified && request != BusRequest::SetInvalid {
            let block_address = get_block_address(block.tag, index);
            debug!("P{}: flush {:#06x} = {:#010x}", id, block_address, block.data);
            memory.write_block(block_address, block.data);
        }

        let response = match request {
            BusRequest::ReadMiss => {
                block.state = MesiState::Shared;
                SnoopResponse { data: block.data, shared: true }
            }
            BusRequest::WriteMiss | BusRequest::SetInvalid => {
                block.state = MesiState::Invalid;
                SnoopResponse::default()
            }
        };
        debug!(
            "P{}: snoop {:?} {:#06x} from P{}: {} -> {}",
            id, request, address, source_id, previous, block.state
        );
        response
    }

    /// Render every set and way for diagnostics
    pub fn dump_state(&self) -> String {
        let mut out = format!("Cache state (P{}):\n", self.processor_id);
        for (i, set) in self.sets.iter().enumerate() {
            let _ = write!(out, "Set {}:", i);
            for block in set {
                if block.state.is_valid() {
                    let _ = write!(
                        out,
                        "\t[T:{:#x} S:{} D:{} L:{}]",
                        block.tag, block.state, block.data, block.lru_counter
                    );
                } else {
                    out.push_str("\t[INVALID]");
                }
            }
            out.push('\n');
        }
        out
    }
}
