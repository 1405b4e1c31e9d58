use thiserror::Error;

/// Failures surfaced by the unique engine and its collaborators.
///
/// Every variant is fatal to the pass that produced it: the engine must be
/// reset (or dropped) before it is used again.
#[derive(Error, Debug)]
pub enum UniqueError {
    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("key has {actual} bytes, engine stores {expected}-byte keys")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("merge buffer of {buffer_bytes} bytes cannot hold {runs} runs of {key_size}-byte keys plus a spare slot")]
    MergeBufferTooSmall {
        buffer_bytes: usize,
        runs: usize,
        key_size: usize,
    },

    #[error("config serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result already consumed or pass failed; call reset() first")]
    ResultConsumed,
}

pub type UniqueResult<T> = std::result::Result<T, UniqueError>;

pub(crate) fn allocation_failed(what: &'static str, bytes: usize) -> UniqueError {
    UniqueError::Allocation { what, bytes }
}
