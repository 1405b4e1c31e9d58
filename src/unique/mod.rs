pub mod comparator;
pub mod config;
pub mod constants;
pub mod cost;
pub mod engine;
pub mod error;
pub mod merger;
pub mod multi_pass;
pub mod run;
pub mod scratch;
pub mod sink;
pub mod tree;

#[cfg(test)]
mod tests;

pub use comparator::{ByteOrder, KeyComparator, LittleEndianU32, LittleEndianU64};
pub use config::UniqueConfig;
pub use cost::{estimate_cost, estimate_cost_with, CostParams};
pub use engine::Unique;
pub use error::{UniqueError, UniqueResult};
pub use sink::{FixedStrideBuffer, SequentialStream, UniqueSink};

use serde::{Deserialize, Serialize};

/// Counters for one pass of a [`Unique`] engine, cleared by `reset`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniqueStats {
    pub puts: u64,
    /// Puts rejected because the tree already held the key.
    pub duplicates_in_memory: u64,
    pub flushes: u64,
    pub keys_flushed: u64,
    pub scratch_bytes_written: u64,
    pub scratch_bytes_read: u64,
    pub collapse_passes: usize,
    pub keys_emitted: u64,
}

impl UniqueStats {
    /// Duplicates removed over the whole pass, in memory or by the merge.
    pub fn duplicates_removed(&self) -> u64 {
        self.puts.saturating_sub(self.keys_emitted)
    }
}

/// Deduplicates `keys` in one call and returns them sorted by `cmp`.
pub fn collect_unique<C, I, K>(
    keys: I,
    key_size: usize,
    cmp: C,
    config: UniqueConfig,
) -> UniqueResult<FixedStrideBuffer>
where
    C: KeyComparator,
    I: IntoIterator<Item = K>,
    K: AsRef<[u8]>,
{
    let mut engine = Unique::new(cmp, key_size, config)?;
    for key in keys {
        engine.put(key.as_ref())?;
    }

    let mut output = FixedStrideBuffer::new();
    engine.get(&mut output)?;
    Ok(output)
}
