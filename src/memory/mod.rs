//! Memory structure: address layout, the backing store and the coherent caches

pub mod backing;
pub mod cache;

use std::fmt;

use backing::BackingStore;

/// Number of sets per cache
pub const SET_NUM: usize = 8;
/// Number of ways per set
pub const ASSOCIATIVITY: usize = 2;
/// Block size in bytes
pub const BLOCK_SIZE: usize = 4;

const OFFSET_BITS: usize = 2;
const INDEX_BITS: usize = 3;
const TAG_BITS: usize = 8;

pub fn get_mask(bits: usize) -> u16 {
    (1 << bits) - 1
}

// Addresses are 16-bit and look like this:
// | unused (3) | tag (8) | index (3) | offset (2) |
pub fn get_offset(address: u16) -> usize {
    (address & get_mask(OFFSET_BITS)) as usize
}

pub fn get_index(address: u16) -> usize {
    ((address >> OFFSET_BITS) & get_mask(INDEX_BITS)) as usize
}

pub fn get_tag(address: u16) -> u16 {
    (address >> (OFFSET_BITS + INDEX_BITS)) & get_mask(TAG_BITS)
}

/// Rebuild the block address of a line from its tag and set index
pub fn get_block_address(tag: u16, index: usize) -> u16 {
    (tag << (OFFSET_BITS + INDEX_BITS)) | ((index as u16) << OFFSET_BITS)
}

/// MESI state of a cache line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MesiState {
    Modified,
    Exclusive,
    Shared,
    #[default]
    Invalid,
}

impl MesiState {
    pub fn is_valid(self) -> bool {
        self != MesiState::Invalid
    }

    pub fn letter(self) -> char {
        match self {
            MesiState::Modified => 'M',
            MesiState::Exclusive => 'E',
            MesiState::Shared => 'S',
            MesiState::Invalid => 'I',
        }
    }
}

impl fmt::Display for MesiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

/// Coherence requests broadcast on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusRequest {
    ReadMiss,
    WriteMiss,
    SetInvalid,
}

/// What a peer cache answers to a snoop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnoopResponse {
    pub data: u32,
    pub shared: bool,
}

/// The bus as seen by a cache serving a local access.
///
/// Implementors route snoops to every cache except the requesting one,
/// and lend out the backing store for fills and write-backs.
pub trait SnoopBus {
    fn broadcast(
        &mut self,
        request: BusRequest,
        address: u16,
        source_id: usize,
    ) -> SnoopResponse;

    fn memory(&mut self) -> &mut BackingStore;
}
