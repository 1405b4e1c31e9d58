use std::time::Instant;

use tracing::{debug, info, warn};

use crate::unique::comparator::KeyComparator;
use crate::unique::config::{max_elements_for, UniqueConfig};
use crate::unique::error::{UniqueError, UniqueResult};
use crate::unique::merger::merge_walk;
use crate::unique::multi_pass::MultiPassMerger;
use crate::unique::run::RunDirectory;
use crate::unique::scratch::ScratchFile;
use crate::unique::sink::UniqueSink;
use crate::unique::tree::BoundedUniqueSet;
use crate::unique::UniqueStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Accumulating,
    Consumed,
    Failed,
}

/// Bounded-memory duplicate eliminator for fixed-size keys.
///
/// Keys go into an in-memory tree until it holds as many elements as the
/// budget allows; the tree is then written to a scratch file as a sorted run
/// and emptied. `walk` or `get` finishes the pass, merging the runs when
/// there are any. After either of them (or after any error) only `reset`
/// makes the engine usable again.
pub struct Unique<C> {
    cmp: C,
    key_size: usize,
    config: UniqueConfig,
    memory_budget: usize,
    tree: BoundedUniqueSet,
    runs: RunDirectory,
    scratch: ScratchFile,
    /// Keys written out by every flush of this pass.
    elements: u64,
    state: PassState,
    stats: UniqueStats,
    io_baseline: (u64, u64),
}

impl<C: KeyComparator> Unique<C> {
    pub fn new(cmp: C, key_size: usize, config: UniqueConfig) -> UniqueResult<Self> {
        if key_size == 0 {
            return Err(UniqueError::InvalidConfig(
                "Key size must be positive".to_string(),
            ));
        }
        config.validate()?;

        let memory_budget = config.memory_budget();
        let mut max_elements =
            max_elements_for(memory_budget, config.tree_element_overhead, key_size);
        if max_elements == 0 {
            warn!(
                memory_budget,
                key_size, "Memory budget cannot hold one tree element; using one element per run"
            );
            max_elements = 1;
        }

        let tree = BoundedUniqueSet::new(
            key_size,
            config.tree_element_overhead,
            max_elements,
        );
        let scratch = ScratchFile::new(&config.temp_directory, config.io_buffer_size_bytes());

        debug!(key_size, memory_budget, max_elements, "unique engine created");

        Ok(Self {
            cmp,
            key_size,
            config,
            memory_budget,
            tree,
            runs: RunDirectory::new(),
            scratch,
            elements: 0,
            state: PassState::Accumulating,
            stats: UniqueStats::default(),
            io_baseline: (0, 0),
        })
    }

    /// Engine with default settings and an absolute budget in bytes.
    pub fn with_budget(cmp: C, key_size: usize, memory_budget: usize) -> UniqueResult<Self> {
        Self::new(cmp, key_size, UniqueConfig::default().with_memory_budget(memory_budget))
    }

    /// Adds `key` to the pass. A key equal to one already seen is dropped,
    /// either now or during the merge.
    pub fn put(&mut self, key: &[u8]) -> UniqueResult<()> {
        self.ensure_accumulating()?;
        if key.len() != self.key_size {
            return Err(UniqueError::KeySizeMismatch {
                expected: self.key_size,
                actual: key.len(),
            });
        }

        if self.tree.is_full() && !self.tree.contains(key, &self.cmp) {
            let flushed = self.flush_tree();
            self.poison_on_err(flushed)?;
        }

        let inserted = self.tree.insert(key, &self.cmp);
        let inserted = self.poison_on_err(inserted)?;
        self.stats.puts += 1;
        if !inserted {
            self.stats.duplicates_in_memory += 1;
        }
        Ok(())
    }

    /// Writes the in-memory keys out as a new run. Does nothing when the
    /// tree is empty.
    pub fn flush(&mut self) -> UniqueResult<()> {
        self.ensure_accumulating()?;
        let flushed = self.flush_tree();
        self.poison_on_err(flushed)
    }

    /// Calls `action` once per distinct key, in ascending order, and returns
    /// how many keys it saw. Ends the pass.
    pub fn walk<F, E>(&mut self, action: F) -> Result<u64, E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: From<UniqueError>,
    {
        self.ensure_accumulating()?;
        self.state = PassState::Consumed;
        let start = Instant::now();

        let result = self.walk_pass(action);
        match &result {
            Ok(emitted) => {
                self.stats.keys_emitted = *emitted;
                info!(
                    emitted,
                    runs = self.runs.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "unique walk finished"
                );
            }
            Err(_) => self.state = PassState::Failed,
        }
        result
    }

    /// Writes every distinct key, in ascending order, into `sink`. Ends the
    /// pass. Returns the number of keys written.
    pub fn get<S: UniqueSink + ?Sized>(&mut self, sink: &mut S) -> UniqueResult<u64> {
        self.ensure_accumulating()?;
        self.state = PassState::Consumed;
        let start = Instant::now();

        let result = self.get_pass(sink);
        match &result {
            Ok(emitted) => {
                self.stats.keys_emitted = *emitted;
                info!(
                    emitted,
                    runs = self.runs.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "unique get finished"
                );
            }
            Err(_) => self.state = PassState::Failed,
        }
        result
    }

    /// Starts a new, empty pass. Tree storage and the scratch file handle
    /// are kept for reuse.
    pub fn reset(&mut self) -> UniqueResult<()> {
        self.tree.clear();
        if let Err(e) = self.scratch.truncate() {
            self.state = PassState::Failed;
            return Err(e);
        }
        self.runs.clear();
        self.elements = 0;
        self.stats = UniqueStats::default();
        self.io_baseline = (self.scratch.bytes_written(), self.scratch.bytes_read());
        self.state = PassState::Accumulating;
        debug!("unique engine reset");
        Ok(())
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn memory_budget(&self) -> usize {
        self.memory_budget
    }

    pub fn config(&self) -> &UniqueConfig {
        &self.config
    }

    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    /// Elements one tree holds before it is flushed.
    pub fn max_elements(&self) -> usize {
        self.tree.max_elements()
    }

    pub fn elements_in_tree(&self) -> usize {
        self.tree.len()
    }

    pub fn elements_flushed(&self) -> u64 {
        self.elements
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Upper bound on the distinct keys of the pass; exact while no run
    /// has been written.
    pub fn found_records(&self) -> u64 {
        self.elements + self.tree.len() as u64
    }

    pub fn has_scratch_file(&self) -> bool {
        self.scratch.is_created()
    }

    /// True once `walk` or `get` has run (or failed) and `reset` is due.
    pub fn is_finished(&self) -> bool {
        self.state != PassState::Accumulating
    }

    pub fn stats(&self) -> UniqueStats {
        UniqueStats {
            scratch_bytes_written: self.scratch.bytes_written() - self.io_baseline.0,
            scratch_bytes_read: self.scratch.bytes_read() - self.io_baseline.1,
            ..self.stats.clone()
        }
    }

    fn ensure_accumulating(&self) -> UniqueResult<()> {
        match self.state {
            PassState::Accumulating => Ok(()),
            PassState::Consumed | PassState::Failed => Err(UniqueError::ResultConsumed),
        }
    }

    fn poison_on_err<T>(&mut self, result: UniqueResult<T>) -> UniqueResult<T> {
        if result.is_err() {
            self.state = PassState::Failed;
        }
        result
    }

    fn flush_tree(&mut self) -> UniqueResult<()> {
        if self.tree.is_empty() {
            return Ok(());
        }

        let run = self.scratch.write_run(self.key_size, self.tree.iter())?;
        self.runs.push(run)?;
        self.elements += run.count;
        self.stats.flushes += 1;
        self.stats.keys_flushed += run.count;
        debug!(
            run = self.runs.len() - 1,
            keys = run.count,
            offset = run.file_offset,
            "flushed unique tree"
        );

        self.tree.clear();
        Ok(())
    }

    /// Bytes for merge windows: the memory budget, but never less than two
    /// keys plus the spare slot.
    fn merge_buffer_size(&self) -> usize {
        self.memory_budget.max(3 * self.key_size)
    }

    fn walk_pass<F, E>(&mut self, mut action: F) -> Result<u64, E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: From<UniqueError>,
    {
        if self.runs.is_empty() {
            let mut emitted = 0u64;
            for key in self.tree.iter() {
                action(key)?;
                emitted += 1;
            }
            return Ok(emitted);
        }

        self.flush_tree()?;
        let buffer_size = self.merge_buffer_size();
        let merger = MultiPassMerger::new(
            self.key_size,
            buffer_size,
            self.config.merge_fan_in,
            self.config.collapse_threshold,
            &self.cmp,
        )?;

        // walk streams in one pass; collapse only what the buffer cannot hold
        if self.runs.len() > merger.buffer_runs() {
            let passes = merger.collapse(&mut self.scratch, &mut self.runs, merger.buffer_runs())?;
            self.stats.collapse_passes += passes;
        }

        merge_walk(
            &mut self.scratch,
            self.runs.as_slice(),
            self.key_size,
            buffer_size,
            &self.cmp,
            action,
        )
    }

    fn get_pass<S: UniqueSink + ?Sized>(&mut self, sink: &mut S) -> UniqueResult<u64> {
        if self.runs.is_empty() {
            sink.begin(self.key_size, self.tree.len() as u64)?;
            for key in self.tree.iter() {
                sink.push(key)?;
            }
            sink.finish()?;
            return Ok(self.tree.len() as u64);
        }

        self.flush_tree()?;
        let merger = MultiPassMerger::new(
            self.key_size,
            self.merge_buffer_size(),
            self.config.merge_fan_in,
            self.config.collapse_threshold,
            &self.cmp,
        )?;
        let passes = merger.collapse(&mut self.scratch, &mut self.runs, merger.final_merge_limit())?;
        self.stats.collapse_passes += passes;

        sink.begin(self.key_size, self.runs.total_keys())?;
        let emitted = merger.merge_into(&mut self.scratch, self.runs.as_slice(), sink)?;
        sink.finish()?;
        Ok(emitted)
    }
}

impl<C> std::fmt::Debug for Unique<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unique")
            .field("key_size", &self.key_size)
            .field("memory_budget", &self.memory_budget)
            .field("elements_in_tree", &self.tree.len())
            .field("elements", &self.elements)
            .field("runs", &self.runs.len())
            .field("state", &self.state)
            .finish()
    }
}
