//! Flat backing store shared by all caches

use super::BLOCK_SIZE;

const STORE_SIZE: usize = 8 * 1024;
const BLOCK_NUM: usize = STORE_SIZE / BLOCK_SIZE;

/// Block-addressed main memory.
/// Accesses past the end are silently ignored (reads return 0).
pub struct BackingStore {
    data: Vec<u32>,
}

impl Default for BackingStore {
    fn default() -> Self {
        Self::make()
    }
}

impl BackingStore {
    pub fn make() -> Self {
        Self { data: vec![0; BLOCK_NUM] }
    }

    pub fn get_block_index(address: u16) -> usize {
        address as usize / BLOCK_SIZE
    }

    pub fn block_num(&self) -> usize {
        self.data.len()
    }

    /// Read the block containing the given address
    pub fn read_block(&self, address: u16) -> u32 {
        self.data
            .get(Self::get_block_index(address))
            .copied()
            .unwrap_or(0)
    }

    /// Write the block containing the given address
    pub fn write_block(&mut self, address: u16, value: u32) {
        if let Some(block) = self.data.get_mut(Self::get_block_index(address)) {
            *block = value;
        }
    }

    /// Render blocks in `start..end`
    pub fn dump(&self, start: usize, end: usize) -> String {
        let end = end.min(self.block_num());
        let mut out = format!("Memory state (blocks {}..{}):\n", start, end);
        for (i, block) in self.data.iter().enumerate().take(end).skip(start) {
            out.push_str(&format!(
                "Block {:#06x}: {:#010x}\n",
                i * BLOCK_SIZE,
                block
            ));
        }
        out
    }
}
