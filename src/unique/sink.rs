use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::unique::error::{allocation_failed, UniqueError, UniqueResult};

/// Destination for the materialised unique sequence produced by `get`.
pub trait UniqueSink {
    /// Called once before any key. `expected_keys` is an upper bound.
    fn begin(&mut self, key_size: usize, expected_keys: u64) -> UniqueResult<()>;

    fn push(&mut self, key: &[u8]) -> UniqueResult<()>;

    fn finish(&mut self) -> UniqueResult<()>;
}

/// Keys packed back to back at a fixed stride, addressable by position.
#[derive(Debug, Default, Clone)]
pub struct FixedStrideBuffer {
    key_size: usize,
    bytes: Vec<u8>,
}

impl FixedStrideBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn len(&self) -> usize {
        if self.key_size == 0 {
            0
        } else {
            self.bytes.len() / self.key_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.key_size)?;
        self.bytes.get(start..start + self.key_size)
    }

    pub fn iter(&self) -> std::slice::ChunksExact<'_, u8> {
        self.bytes.chunks_exact(self.key_size.max(1))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl UniqueSink for FixedStrideBuffer {
    fn begin(&mut self, key_size: usize, expected_keys: u64) -> UniqueResult<()> {
        self.key_size = key_size;
        self.bytes.clear();
        let bytes = usize::try_from(expected_keys)
            .ok()
            .and_then(|keys| keys.checked_mul(key_size))
            .ok_or_else(|| allocation_failed("fixed-stride output", usize::MAX))?;
        self.bytes
            .try_reserve_exact(bytes)
            .map_err(|_| allocation_failed("fixed-stride output", bytes))
    }

    fn push(&mut self, key: &[u8]) -> UniqueResult<()> {
        self.bytes
            .try_reserve(key.len())
            .map_err(|_| allocation_failed("fixed-stride output", key.len()))?;
        self.bytes.extend_from_slice(key);
        Ok(())
    }

    fn finish(&mut self) -> UniqueResult<()> {
        Ok(())
    }
}

enum StreamState {
    Idle,
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
}

/// Temporary file written once, then read back sequentially.
pub struct SequentialStream {
    directory: PathBuf,
    io_buffer_size: usize,
    state: StreamState,
    key_size: usize,
    keys: u64,
    keys_read: u64,
}

impl SequentialStream {
    pub fn new_in(directory: &Path, io_buffer_size: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            io_buffer_size,
            state: StreamState::Idle,
            key_size: 0,
            keys: 0,
            keys_read: 0,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Keys written by the last `get`.
    pub fn len(&self) -> u64 {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    /// Reads the next key into `buf`. Returns `false` at the end of the stream.
    pub fn next_key(&mut self, buf: &mut [u8]) -> UniqueResult<bool> {
        if self.keys_read >= self.keys {
            return Ok(false);
        }
        match &mut self.state {
            StreamState::Reading(reader) => {
                reader.read_exact(buf)?;
                self.keys_read += 1;
                Ok(true)
            }
            _ => Err(UniqueError::ResultConsumed),
        }
    }

    /// Starts reading from the first key again.
    pub fn rewind(&mut self) -> UniqueResult<()> {
        match &mut self.state {
            StreamState::Reading(reader) => {
                reader.seek(SeekFrom::Start(0))?;
                self.keys_read = 0;
                Ok(())
            }
            _ => Err(UniqueError::ResultConsumed),
        }
    }

    /// Every remaining key, packed at a fixed stride.
    pub fn read_all(&mut self) -> UniqueResult<Vec<u8>> {
        let remaining = (self.keys - self.keys_read) as usize * self.key_size;
        let mut out = Vec::new();
        out.try_reserve_exact(remaining)
            .map_err(|_| allocation_failed("stream read-back", remaining))?;
        out.resize(remaining, 0);
        for chunk in out.chunks_exact_mut(self.key_size.max(1)) {
            self.next_key(chunk)?;
        }
        Ok(out)
    }
}

impl UniqueSink for SequentialStream {
    fn begin(&mut self, key_size: usize, _expected_keys: u64) -> UniqueResult<()> {
        let file = match std::mem::replace(&mut self.state, StreamState::Idle) {
            StreamState::Writing(writer) => writer.into_inner().map_err(|e| e.into_error())?,
            StreamState::Reading(reader) => reader.into_inner(),
            StreamState::Idle => {
                std::fs::create_dir_all(&self.directory)?;
                tempfile::tempfile_in(&self.directory)?
            }
        };
        file.set_len(0)?;
        let mut writer = BufWriter::with_capacity(self.io_buffer_size, file);
        writer.seek(SeekFrom::Start(0))?;

        self.state = StreamState::Writing(writer);
        self.key_size = key_size;
        self.keys = 0;
        self.keys_read = 0;
        Ok(())
    }

    fn push(&mut self, key: &[u8]) -> UniqueResult<()> {
        match &mut self.state {
            StreamState::Writing(writer) => {
                writer.write_all(key)?;
                self.keys += 1;
                Ok(())
            }
            _ => Err(UniqueError::ResultConsumed),
        }
    }

    fn finish(&mut self) -> UniqueResult<()> {
        let mut file = match std::mem::replace(&mut self.state, StreamState::Idle) {
            StreamState::Writing(writer) => writer.into_inner().map_err(|e| e.into_error())?,
            _ => return Err(UniqueError::ResultConsumed),
        };
        file.seek(SeekFrom::Start(0))?;
        self.state = StreamState::Reading(BufReader::with_capacity(self.io_buffer_size, file));
        Ok(())
    }
}
