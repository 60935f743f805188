use thiserror::Error;

/// The engine's error surface (spec §6/§7). `Panic`-class failures latch the
/// store: once raised, every subsequent call returns the same error back
/// until the store is reopened.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("file corrupt: {0}")]
    FileCorrupt(String),

    #[error("chunk {0} not found")]
    ChunkNotFound(u32),

    #[error("unsupported format {found} (supported [{min}..{max}])")]
    UnsupportedFormat { found: u32, min: u32, max: u32 },

    #[error("file locked")]
    FileLocked,

    #[error("writing failed: {0}")]
    WritingFailed(String),

    #[error("reading failed: {0}")]
    ReadingFailed(String),

    #[error("store is closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The store panicked earlier; this is the latched error re-raised on
    /// every subsequent public call.
    #[error("store panicked: {0}")]
    Panic(String),
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        StorageError::ReadingFailed(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
