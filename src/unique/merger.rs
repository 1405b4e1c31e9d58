use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::unique::comparator::KeyComparator;
use crate::unique::error::{allocation_failed, UniqueError, UniqueResult};
use crate::unique::run::RunDescriptor;
use crate::unique::scratch::ScratchFile;

/// Most runs a merge buffer of `buffer_size` bytes can stream at once: one
/// key per run plus the spare slot.
pub fn max_runs_for_buffer(buffer_size: usize, key_size: usize) -> usize {
    (buffer_size / key_size).saturating_sub(1)
}

/// Read window over one run of the scratch file.
#[derive(Debug)]
struct MergeCursor {
    window: Vec<u8>,
    max_keys: usize,
    loaded: usize,
    pos: usize,
    next_offset: u64,
    remaining: u64,
}

impl MergeCursor {
    fn new(run: &RunDescriptor, max_keys: usize, key_size: usize) -> UniqueResult<Self> {
        let mut window = Vec::new();
        window
            .try_reserve_exact(max_keys * key_size)
            .map_err(|_| allocation_failed("merge window", max_keys * key_size))?;

        Ok(Self {
            window,
            max_keys,
            loaded: 0,
            pos: 0,
            next_offset: run.file_offset,
            remaining: run.count,
        })
    }

    fn current(&self, key_size: usize) -> &[u8] {
        let start = self.pos * key_size;
        &self.window[start..start + key_size]
    }

    fn previous(&self, key_size: usize) -> &[u8] {
        let start = (self.pos - 1) * key_size;
        &self.window[start..start + key_size]
    }

    fn has_current(&self) -> bool {
        self.pos < self.loaded
    }

    /// Loads the next piece of the run. Returns the number of keys loaded.
    fn refill(&mut self, scratch: &mut ScratchFile, key_size: usize) -> UniqueResult<usize> {
        let keys = (self.max_keys as u64).min(self.remaining) as usize;
        if keys == 0 {
            self.loaded = 0;
            self.pos = 0;
            return Ok(0);
        }

        let bytes = keys * key_size;
        if self.window.capacity() < bytes {
            let additional = bytes - self.window.len();
            self.window
                .try_reserve_exact(additional)
                .map_err(|_| allocation_failed("merge window", bytes))?;
        }
        self.window.resize(bytes, 0);
        scratch.read_at(self.next_offset, &mut self.window[..bytes])?;

        self.next_offset += bytes as u64;
        self.remaining -= keys as u64;
        self.loaded = keys;
        self.pos = 0;
        trace!(keys, remaining = self.remaining, "merge window refilled");
        Ok(keys)
    }

    /// Hands the window back once the run is used up.
    fn release(&mut self) -> usize {
        let freed = self.max_keys;
        self.window = Vec::new();
        self.max_keys = 0;
        self.loaded = 0;
        self.pos = 0;
        freed
    }
}

/// Bytes held by merge windows and the spare slot.
#[derive(Debug, Default)]
struct BufferUsage {
    live: usize,
    peak: usize,
}

impl BufferUsage {
    fn resized(&mut self, before: usize, after: usize) {
        self.live = self.live - before + after;
        self.peak = self.peak.max(self.live);
    }
}

/// Min-heap of cursor indices keyed by each cursor's current key.
///
/// Hand-rolled rather than `BinaryHeap` because the ordering goes through
/// the caller's comparator and the keys live in the cursors' windows.
#[derive(Debug)]
struct CursorQueue {
    heap: Vec<usize>,
}

impl CursorQueue {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn top(&self) -> Option<usize> {
        self.heap.first().copied()
    }

    fn push<C: KeyComparator>(&mut self, cursor: usize, cursors: &[MergeCursor], key_size: usize, cmp: &C) {
        self.heap.push(cursor);
        let mut child = self.heap.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.less(child, parent, cursors, key_size, cmp) {
                break;
            }
            self.heap.swap(child, parent);
            child = parent;
        }
    }

    /// The top cursor moved to a new key: restore heap order.
    fn replaced_top<C: KeyComparator>(&mut self, cursors: &[MergeCursor], key_size: usize, cmp: &C) {
        self.sift_down(0, cursors, key_size, cmp);
    }

    fn pop_top<C: KeyComparator>(&mut self, cursors: &[MergeCursor], key_size: usize, cmp: &C) -> Option<usize> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0, cursors, key_size, cmp);
        }
        Some(top)
    }

    fn sift_down<C: KeyComparator>(&mut self, mut parent: usize, cursors: &[MergeCursor], key_size: usize, cmp: &C) {
        let len = self.heap.len();
        loop {
            let left = 2 * parent + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let smallest = if right < len && self.less(right, left, cursors, key_size, cmp) {
                right
            } else {
                left
            };
            if !self.less(smallest, parent, cursors, key_size, cmp) {
                break;
            }
            self.heap.swap(smallest, parent);
            parent = smallest;
        }
    }

    fn less<C: KeyComparator>(&self, a: usize, b: usize, cursors: &[MergeCursor], key_size: usize, cmp: &C) -> bool {
        let key_a = cursors[self.heap[a]].current(key_size);
        let key_b = cursors[self.heap[b]].current(key_size);
        cmp.compare(key_a, key_b) == Ordering::Less
    }
}

/// Where the key that just left the top of the queue can be read from.
enum OldTop {
    Window(usize),
    Spare,
}

/// Result of one k-way merge.
#[derive(Debug, Clone, Copy)]
struct MergeOutcome {
    emitted: u64,
    /// Most bytes of window and spare space held at once.
    peak_buffer_bytes: usize,
}

/// Streams the union of `runs` to `action` in ascending order, each distinct
/// key exactly once.
///
/// Every run must be sorted and free of duplicates. The merge buffer is split
/// evenly between the runs; when a run is used up its share goes to the
/// cursor now on top of the queue. Returns the number of keys emitted.
pub fn merge_walk<C, F, E>(
    scratch: &mut ScratchFile,
    runs: &[RunDescriptor],
    key_size: usize,
    buffer_size: usize,
    cmp: &C,
    action: F,
) -> Result<u64, E>
where
    C: KeyComparator,
    F: FnMut(&[u8]) -> Result<(), E>,
    E: From<UniqueError>,
{
    merge_runs(scratch, runs, key_size, buffer_size, cmp, action).map(|outcome| outcome.emitted)
}

fn merge_runs<C, F, E>(
    scratch: &mut ScratchFile,
    runs: &[RunDescriptor],
    key_size: usize,
    buffer_size: usize,
    cmp: &C,
    mut action: F,
) -> Result<MergeOutcome, E>
where
    C: KeyComparator,
    F: FnMut(&[u8]) -> Result<(), E>,
    E: From<UniqueError>,
{
    let runs: Vec<&RunDescriptor> = runs.iter().filter(|r| r.count > 0).collect();
    if runs.is_empty() {
        return Ok(MergeOutcome {
            emitted: 0,
            peak_buffer_bytes: 0,
        });
    }
    if max_runs_for_buffer(buffer_size, key_size) < runs.len() {
        return Err(UniqueError::MergeBufferTooSmall {
            buffer_bytes: buffer_size,
            runs: runs.len(),
            key_size,
        }
        .into());
    }

    // one key's worth is kept back for the spare slot
    let keys_per_run = (buffer_size - key_size) / runs.len() / key_size;
    debug!(runs = runs.len(), keys_per_run, "starting k-way merge");

    let mut usage = BufferUsage::default();
    let mut spare = Vec::new();
    spare
        .try_reserve_exact(key_size)
        .map_err(|_| allocation_failed("merge spare slot", key_size))?;
    spare.resize(key_size, 0);
    usage.resized(0, spare.capacity());

    let mut cursors = Vec::with_capacity(runs.len());
    let mut queue = CursorQueue::with_capacity(runs.len());
    for run in &runs {
        let mut cursor = MergeCursor::new(run, keys_per_run, key_size)?;
        usage.resized(0, cursor.window.capacity());
        cursor.refill(scratch, key_size)?;
        cursors.push(cursor);
    }
    for index in 0..cursors.len() {
        queue.push(index, &cursors, key_size, cmp);
    }

    let mut emitted = 0u64;
    let Some(mut top) = queue.top() else {
        return Ok(MergeOutcome {
            emitted: 0,
            peak_buffer_bytes: usage.peak,
        });
    };

    while queue.len() > 1 {
        cursors[top].pos += 1;
        let old_top = if cursors[top].has_current() {
            queue.replaced_top(&cursors, key_size, cmp);
            OldTop::Window(top)
        } else {
            spare.copy_from_slice(cursors[top].previous(key_size));
            let before = cursors[top].window.capacity();
            if cursors[top].refill(scratch, key_size)? > 0 {
                usage.resized(before, cursors[top].window.capacity());
                queue.replaced_top(&cursors, key_size, cmp);
            } else {
                let freed = cursors[top].release();
                usage.resized(before, 0);
                queue.pop_top(&cursors, key_size, cmp);
                if let Some(heir) = queue.top() {
                    cursors[heir].max_keys += freed;
                }
            }
            OldTop::Spare
        };

        top = match queue.top() {
            Some(next) => next,
            None => break,
        };

        let old_key = match old_top {
            OldTop::Window(index) => cursors[index].previous(key_size),
            OldTop::Spare => spare.as_slice(),
        };
        if cmp.compare(old_key, cursors[top].current(key_size)) != Ordering::Equal {
            action(old_key)?;
            emitted += 1;
        }
    }

    // The last run standing is unique on its own.
    let cursor = &mut cursors[top];
    loop {
        while cursor.has_current() {
            action(cursor.current(key_size))?;
            emitted += 1;
            cursor.pos += 1;
        }
        let before = cursor.window.capacity();
        if cursor.refill(scratch, key_size)? == 0 {
            break;
        }
        usage.resized(before, cursor.window.capacity());
    }

    debug!(emitted, peak_buffer_bytes = usage.peak, "k-way merge finished");
    Ok(MergeOutcome {
        emitted,
        peak_buffer_bytes: usage.peak,
    })
}
