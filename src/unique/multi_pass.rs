use std::io::Write;

use tracing::debug;

use crate::unique::comparator::KeyComparator;
use crate::unique::constants::MIN_MERGE_FAN_IN;
use crate::unique::error::{UniqueError, UniqueResult};
use crate::unique::merger::{max_runs_for_buffer, merge_walk};
use crate::unique::run::{RunDescriptor, RunDirectory};
use crate::unique::scratch::ScratchFile;
use crate::unique::sink::UniqueSink;

/// Bounded fan-in merging of many runs.
///
/// Runs are collapsed in groups of `fan_in` into a fresh scratch file until
/// few enough remain for one final merge. Duplicates are dropped in every
/// pass, so later passes only move distinct keys.
pub struct MultiPassMerger<'c, C> {
    key_size: usize,
    buffer_size: usize,
    fan_in: usize,
    collapse_threshold: usize,
    cmp: &'c C,
}

impl<'c, C: KeyComparator> MultiPassMerger<'c, C> {
    pub fn new(
        key_size: usize,
        buffer_size: usize,
        fan_in: usize,
        collapse_threshold: usize,
        cmp: &'c C,
    ) -> UniqueResult<Self> {
        let buffer_runs = max_runs_for_buffer(buffer_size, key_size);
        if buffer_runs < MIN_MERGE_FAN_IN {
            return Err(UniqueError::MergeBufferTooSmall {
                buffer_bytes: buffer_size,
                runs: MIN_MERGE_FAN_IN,
                key_size,
            });
        }

        Ok(Self {
            key_size,
            buffer_size,
            fan_in: fan_in.clamp(MIN_MERGE_FAN_IN, buffer_runs),
            collapse_threshold,
            cmp,
        })
    }

    /// Runs the merge buffer can stream in a single pass.
    pub fn buffer_runs(&self) -> usize {
        max_runs_for_buffer(self.buffer_size, self.key_size)
    }

    /// Run count the final merge of `get` accepts without collapsing.
    pub fn final_merge_limit(&self) -> usize {
        self.collapse_threshold.min(self.buffer_runs())
    }

    /// Collapses runs until at most `limit` remain. Returns the passes made.
    pub fn collapse(
        &self,
        scratch: &mut ScratchFile,
        runs: &mut RunDirectory,
        limit: usize,
    ) -> UniqueResult<usize> {
        let limit = limit.max(1);
        let mut passes = 0;
        while runs.len() > limit {
            let (collapsed, collapsed_runs) = self.collapse_pass(scratch, runs.as_slice())?;
            debug!(
                pass = passes + 1,
                before = runs.len(),
                after = collapsed_runs.len(),
                "collapsed merge runs"
            );
            *scratch = collapsed;
            runs.replace(collapsed_runs);
            passes += 1;
        }
        Ok(passes)
    }

    /// Final pass: merges every run into `sink`. Returns the keys written.
    pub fn merge_into<S: UniqueSink + ?Sized>(
        &self,
        scratch: &mut ScratchFile,
        runs: &[RunDescriptor],
        sink: &mut S,
    ) -> UniqueResult<u64> {
        merge_walk(scratch, runs, self.key_size, self.buffer_size, self.cmp, |key| sink.push(key))
    }

    fn collapse_pass(
        &self,
        source: &mut ScratchFile,
        runs: &[RunDescriptor],
    ) -> UniqueResult<(ScratchFile, Vec<RunDescriptor>)> {
        let mut target = source.sibling();
        let mut collapsed = Vec::with_capacity(runs.len() / self.fan_in + 2);
        let last = runs.len() - 1;

        // the trailing group absorbs up to half a fan-in of leftovers
        let mut start = 0;
        while start + self.fan_in * 3 / 2 <= last {
            let group = &runs[start..start + self.fan_in];
            collapsed.push(self.merge_group(source, group, &mut target)?);
            start += self.fan_in;
        }
        for group in runs[start..].chunks(self.buffer_runs()) {
            collapsed.push(self.merge_group(source, group, &mut target)?);
        }

        target.carry_counters_from(source);
        Ok((target, collapsed))
    }

    fn merge_group(
        &self,
        source: &mut ScratchFile,
        group: &[RunDescriptor],
        target: &mut ScratchFile,
    ) -> UniqueResult<RunDescriptor> {
        let file_offset = target.len();
        let mut writer = target.writer_at_end()?;
        let count = merge_walk(source, group, self.key_size, self.buffer_size, self.cmp, |key| {
            writer.write_all(key).map_err(UniqueError::from)
        })?;
        writer.flush()?;
        drop(writer);

        target.commit_appended(count * self.key_size as u64);
        Ok(RunDescriptor { file_offset, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unique::comparator::LittleEndianU32;
    use crate::unique::sink::FixedStrideBuffer;

    fn directory_of(scratch: &mut ScratchFile, runs: &[Vec<u32>]) -> RunDirectory {
        let mut directory = RunDirectory::new();
        for values in runs {
            let encoded: Vec<[u8; 4]> = values.iter().map(|v| v.to_le_bytes()).collect();
            let run = scratch
                .write_run(4, encoded.iter().map(|k| k.as_slice()))
                .unwrap();
            directory.push(run).unwrap();
        }
        directory
    }

    fn decode(buffer: &FixedStrideBuffer) -> Vec<u32> {
        buffer
            .iter()
            .map(|k| u32::from_le_bytes(k.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_collapse_reaches_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::new(temp_dir.path(), 64);
        let runs: Vec<Vec<u32>> = (0..40u32).map(|r| vec![r, r + 1, 100 + r]).collect();
        let mut directory = directory_of(&mut scratch, &runs);

        let merger = MultiPassMerger::new(4, 4096, 7, 15, &LittleEndianU32).unwrap();
        let passes = merger
            .collapse(&mut scratch, &mut directory, merger.final_merge_limit())
            .unwrap();

        assert_eq!(passes, 1);
        // 40 runs: five groups of seven, then a tail of five
        assert_eq!(directory.len(), 6);

        let mut out = FixedStrideBuffer::new();
        out.begin(4, directory.total_keys()).unwrap();
        merger
            .merge_into(&mut scratch, directory.as_slice(), &mut out)
            .unwrap();

        let mut expected: Vec<u32> = (0..41).chain(100..140).collect();
        expected.dedup();
        assert_eq!(decode(&out), expected);
    }

    #[test]
    fn test_buffer_bound_fan_in() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::new(temp_dir.path(), 64);
        let runs: Vec<Vec<u32>> = (0..9u32).map(|r| vec![r * 2, r * 2 + 1, 50]).collect();
        let mut directory = directory_of(&mut scratch, &runs);

        // 12 bytes hold two keys plus the spare
        let merger = MultiPassMerger::new(4, 12, 7, 15, &LittleEndianU32).unwrap();
        assert_eq!(merger.buffer_runs(), 2);
        let passes = merger.collapse(&mut scratch, &mut directory, 2).unwrap();
        assert!(passes >= 3);
        assert!(directory.len() <= 2);

        let mut out = FixedStrideBuffer::new();
        out.begin(4, directory.total_keys()).unwrap();
        merger
            .merge_into(&mut scratch, directory.as_slice(), &mut out)
            .unwrap();

        let mut expected: Vec<u32> = (0..18).collect();
        expected.push(50);
        assert_eq!(decode(&out), expected);
        assert!(scratch.bytes_read() > 0);
    }

    #[test]
    fn test_rejects_buffer_without_two_slots() {
        let result = MultiPassMerger::new(4, 8, 7, 15, &LittleEndianU32);
        assert!(matches!(result, Err(UniqueError::MergeBufferTooSmall { .. })));
    }
}
