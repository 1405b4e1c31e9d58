use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::unique::error::UniqueResult;
use crate::unique::run::RunDescriptor;

/// Private temporary file holding concatenated runs.
///
/// The file is created on first write and is anonymous: the OS removes it
/// once the handle is dropped.
#[derive(Debug)]
pub struct ScratchFile {
    directory: PathBuf,
    io_buffer_size: usize,
    file: Option<File>,
    write_pos: u64,
    bytes_written: u64,
    bytes_read: u64,
}

impl ScratchFile {
    pub fn new(directory: &Path, io_buffer_size: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            io_buffer_size,
            file: None,
            write_pos: 0,
            bytes_written: 0,
            bytes_read: 0,
        }
    }

    pub fn is_created(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes of run data currently in the file.
    pub fn len(&self) -> u64 {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Appends `keys` (already sorted and unique) as one new run.
    pub fn write_run<'a, I>(&mut self, key_size: usize, keys: I) -> UniqueResult<RunDescriptor>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let file_offset = self.write_pos;
        let mut writer = self.writer_at_end()?;
        let mut count = 0u64;
        for key in keys {
            debug_assert_eq!(key.len(), key_size);
            writer.write_all(key)?;
            count += 1;
        }
        writer.flush()?;
        drop(writer);

        let run = RunDescriptor { file_offset, count };
        self.commit_appended(run.byte_len(key_size));
        Ok(run)
    }

    /// Opens a buffered writer positioned at the end of the run data.
    pub fn writer_at_end(&mut self) -> UniqueResult<BufWriter<&mut File>> {
        let io_buffer_size = self.io_buffer_size;
        let write_pos = self.write_pos;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(write_pos))?;
        Ok(BufWriter::with_capacity(io_buffer_size, file))
    }

    /// Records bytes appended through [`ScratchFile::writer_at_end`].
    pub fn commit_appended(&mut self, bytes: u64) {
        self.write_pos += bytes;
        self.bytes_written += bytes;
    }

    /// Fills `buf` from `offset`; `buf` must lie within written data.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> UniqueResult<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        trace!(offset, bytes = buf.len(), "scratch read");
        Ok(())
    }

    /// Discards all runs, keeping the file handle for the next pass.
    pub fn truncate(&mut self) -> UniqueResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
        }
        self.write_pos = 0;
        Ok(())
    }

    /// A fresh, empty scratch file in the same directory.
    pub fn sibling(&self) -> Self {
        Self::new(&self.directory, self.io_buffer_size)
    }

    /// Folds another file's I/O counters into this one's.
    pub fn carry_counters_from(&mut self, other: &ScratchFile) {
        self.bytes_written += other.bytes_written;
        self.bytes_read += other.bytes_read;
    }

    fn file_mut(&mut self) -> UniqueResult<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                std::fs::create_dir_all(&self.directory)?;
                let file = tempfile::tempfile_in(&self.directory)?;
                trace!(directory = %self.directory.display(), "scratch file created");
                file
            }
        };
        Ok(self.file.insert(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::new(temp_dir.path(), 4096);
        assert!(!scratch.is_created());

        scratch.truncate().unwrap();
        assert!(!scratch.is_created());

        scratch.write_run(2, [&b"aa"[..], &b"bb"[..]]).unwrap();
        assert!(scratch.is_created());
    }

    #[test]
    fn test_runs_are_concatenated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::new(temp_dir.path(), 16);

        let first = scratch.write_run(2, [&b"aa"[..], &b"cc"[..]]).unwrap();
        let second = scratch.write_run(2, [&b"bb"[..]]).unwrap();
        assert_eq!(first, RunDescriptor { file_offset: 0, count: 2 });
        assert_eq!(second, RunDescriptor { file_offset: 4, count: 1 });
        assert_eq!(scratch.len(), 6);

        let mut buf = [0u8; 6];
        scratch.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"aaccbb");
        assert_eq!(scratch.bytes_read(), 6);
        assert_eq!(scratch.bytes_written(), 6);
    }

    #[test]
    fn test_truncate_rewinds() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::new(temp_dir.path(), 16);
        scratch.write_run(1, [&b"x"[..], &b"y"[..]]).unwrap();

        scratch.truncate().unwrap();
        assert!(scratch.is_empty());

        let run = scratch.write_run(1, [&b"z"[..]]).unwrap();
        assert_eq!(run.file_offset, 0);
        let mut buf = [0u8; 1];
        scratch.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"z");
    }
}
