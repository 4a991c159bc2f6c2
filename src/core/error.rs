use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChemdexError {
    #[error("Index is read-only")]
    ReadOnly,

    #[error("Index is closed")]
    Closed,

    #[error("Record id {0} is already in use")]
    DuplicateId(u64),

    #[error("Record id {0} not found")]
    NotFound(u64),

    #[error("No free record id left")]
    IdsExhausted,

    #[error("Unsupported index version: {found} (expected {expected})")]
    VersionMismatch { found: String, expected: String },

    #[error("Index type mismatch: found {found}, expected {expected}")]
    TypeMismatch { found: String, expected: String },

    #[error("Allocation of {requested} bytes exceeds maximum arena file size {max}")]
    AllocationTooLarge { requested: u64, max: u64 },

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid arena address: file {file}, offset {offset}")]
    InvalidAddress { file: i32, offset: i64 },

    #[error("Corrupted index: {0}")]
    Corrupted(String),

    #[error("Handle refers to a database that has been closed")]
    StaleHandle,

    #[error("Current object was already taken or no current record")]
    NoCurrentObject,

    #[error("Unknown database id: {0}")]
    UnknownDatabase(u64),

    #[error("Unknown search id: {0}")]
    UnknownSearch(u64),

    #[error("Chemistry error: {0}")]
    Chemistry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChemdexError>;
