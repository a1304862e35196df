//! Error kinds shared by the engine, resolver, and server.
//!
//! Protocol/command/keyspace errors become a single RESP error line;
//! resource errors can escalate to a disconnect; backfill errors are logged
//! and leave the filter bit cleared rather than propagating to a client.

use thiserror::Error;

pub type HkvResult<T> = Result<T, HkvError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HkvError {
    #[error("key not found")]
    NotFound,

    #[error("key too long")]
    KeyTooLong,

    #[error("value too long")]
    ValueTooLong,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("invalid expire time")]
    InvalidExpire,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("unknown operate db '{0}'")]
    CrossSlot(i64),

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("query buffer limit exceeded")]
    BufferLimitExceeded,
}

impl HkvError {
    /// Maps an error to the single-line RESP error code redis clients expect
    /// (`-ERR ...`, `-OOM ...`, or a bare `-WRONGTYPE ...`).
    pub fn resp_message(&self) -> String {
        match self {
            HkvError::OutOfMemory => self.to_string(),
            HkvError::WrongType => self.to_string(),
            _ => format!("ERR {self}"),
        }
    }
}
