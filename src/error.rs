use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    EmptyKey,
    KeyNotFound,
    IndexUpdateFailed,
    DataFileNotFound(u32),
    DirectoryCorrupted(String),
    InvalidCrc,
    EndOfSegment,
    AlreadyInUse,
    ExceedsMaxBatchSize,
    MergeInProgress,
    MergeRatioUnreached,
    InsufficientDiskSpace,
    InvalidConfig(String),
    IndexBackend(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::EmptyKey => write!(f, "Key is empty"),
            Error::KeyNotFound => write!(f, "Key not found"),
            Error::IndexUpdateFailed => write!(f, "Failed to update index"),
            Error::DataFileNotFound(id) => write!(f, "Segment file {} not found", id),
            Error::DirectoryCorrupted(msg) => write!(f, "Store directory corrupted: {}", msg),
            Error::InvalidCrc => write!(f, "Invalid CRC, record may be corrupted"),
            Error::EndOfSegment => write!(f, "End of segment reached"),
            Error::AlreadyInUse => write!(f, "Store directory is locked by another process"),
            Error::ExceedsMaxBatchSize => write!(f, "Batch exceeds the maximum operation count"),
            Error::MergeInProgress => write!(f, "Merge is already in progress"),
            Error::MergeRatioUnreached => write!(f, "Reclaimable ratio below the merge threshold"),
            Error::InsufficientDiskSpace => write!(f, "Not enough free disk space for merge"),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::IndexBackend(msg) => write!(f, "Index backend error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
