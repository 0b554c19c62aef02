use std::io;
use thiserror::Error;

/// Why a single record could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty record")]
    Empty,
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid pointer {0:?}, expected hexadecimal")]
    InvalidPointer(String),
    #[error("invalid size {0:?}, expected a non-negative decimal")]
    InvalidSize(String),
}

/// Fatal errors while analyzing an allocation log.
///
/// Every variant aborts the run: the stream cannot be replayed, and a table
/// built from a partially trusted stream would produce a misleading report.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed record #{number} {record:?}: {reason}")]
    MalformedRecord {
        number: u64,
        record: String,
        #[source]
        reason: ParseError,
    },
    #[error("unknown event kind {tag:?} in record #{number}")]
    UnknownEventKind { number: u64, tag: String },
    #[error("record #{number} frees pointer {ptr:#x}, which is not a live allocation")]
    DeallocationOfUntrackedPointer { number: u64, ptr: u64 },
    #[error("failed to read allocation log")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
