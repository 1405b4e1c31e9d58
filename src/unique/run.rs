use serde::{Deserialize, Serialize};

use crate::unique::constants::DIRECTORY_INITIAL_CAPACITY;
use crate::unique::error::{allocation_failed, UniqueResult};

/// One sorted, duplicate-free run in a scratch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub file_offset: u64,
    pub count: u64,
}

impl RunDescriptor {
    pub fn byte_len(&self, key_size: usize) -> u64 {
        self.count * key_size as u64
    }
}

/// Runs in the order they were written. Append-only within a pass.
#[derive(Debug, Default)]
pub struct RunDirectory {
    runs: Vec<RunDescriptor>,
}

impl RunDirectory {
    pub fn new() -> Self {
        Self {
            runs: Vec::with_capacity(DIRECTORY_INITIAL_CAPACITY),
        }
    }

    pub fn push(&mut self, run: RunDescriptor) -> UniqueResult<()> {
        self.runs.try_reserve(1).map_err(|_| {
            allocation_failed("run directory", std::mem::size_of::<RunDescriptor>())
        })?;
        self.runs.push(run);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn total_keys(&self) -> u64 {
        self.runs.iter().map(|r| r.count).sum()
    }

    pub fn as_slice(&self) -> &[RunDescriptor] {
        &self.runs
    }

    /// Swaps in the directory of a collapsed scratch file.
    pub fn replace(&mut self, runs: Vec<RunDescriptor>) {
        self.runs = runs;
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }
}
