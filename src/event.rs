//! Parsing of allocation log records into typed events.
//!
//! One record per line, tab separated:
//!
//! ```text
//! A\t<ptr_hex>\t<size_decimal>\t<source_line>\t<frame_1>\t<frame_2>\t...
//! R\t<ptr_hex>\t<size_decimal>\t<source_line>\t<frame_1>\t<frame_2>\t...
//! D\t<ptr_hex>
//! ```

use std::fmt;

use tracing::trace;

use crate::error::{Error, ParseError, Result};
use crate::source::{LineSource, Pull};

/// An allocation as reported by the instrumented allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: u64,
    pub size: u64,
    pub source_line: String,
    /// Frames in the order the producer wrote them.
    pub backtrace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Allocate(Allocation),
    Reallocate(Allocation),
    Deallocate { ptr: u64 },
    /// A kind tag this analyzer does not know. Rejected when applied.
    Unknown { tag: String, ptr: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Allocate,
    Reallocate,
    Deallocate,
    Unknown(String),
}

impl EventKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "A" => EventKind::Allocate,
            "R" => EventKind::Reallocate,
            "D" => EventKind::Deallocate,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Allocate => f.write_str("A"),
            EventKind::Reallocate => f.write_str("R"),
            EventKind::Deallocate => f.write_str("D"),
            EventKind::Unknown(tag) => f.write_str(tag),
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Allocate(_) => EventKind::Allocate,
            Event::Reallocate(_) => EventKind::Reallocate,
            Event::Deallocate { .. } => EventKind::Deallocate,
            Event::Unknown { tag, .. } => EventKind::Unknown(tag.clone()),
        }
    }

    pub fn ptr(&self) -> u64 {
        match self {
            Event::Allocate(allocation) | Event::Reallocate(allocation) => allocation.ptr,
            Event::Deallocate { ptr } | Event::Unknown { ptr, .. } => *ptr,
        }
    }
}

/// An event together with its 1-based position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub number: u64,
    pub event: Event,
}

fn parse_ptr(field: &str) -> Result<u64, ParseError> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if digits.is_empty() || digits.starts_with('+') {
        return Err(ParseError::InvalidPointer(field.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidPointer(field.to_string()))
}

fn parse_size(field: &str) -> Result<u64, ParseError> {
    if field.starts_with('+') {
        return Err(ParseError::InvalidSize(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| ParseError::InvalidSize(field.to_string()))
}

/// Parses a single record, without its line terminator.
pub fn parse_record(line: &str) -> Result<Event, ParseError> {
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut fields = line.split('\t');
    let kind = fields
        .next()
        .map(EventKind::from_tag)
        .ok_or(ParseError::Empty)?;
    let ptr = parse_ptr(fields.next().ok_or(ParseError::MissingField("pointer"))?)?;

    let allocation = |mut fields: std::str::Split<'_, char>| -> Result<Allocation, ParseError> {
        let size = parse_size(fields.next().ok_or(ParseError::MissingField("size"))?)?;
        let source_line = fields
            .next()
            .ok_or(ParseError::MissingField("source line"))?
            .to_string();
        Ok(Allocation {
            ptr,
            size,
            source_line,
            backtrace: fields.map(str::to_string).collect(),
        })
    };

    Ok(match kind {
        EventKind::Allocate => Event::Allocate(allocation(fields)?),
        EventKind::Reallocate => Event::Reallocate(allocation(fields)?),
        EventKind::Deallocate => Event::Deallocate { ptr },
        EventKind::Unknown(tag) => Event::Unknown { tag, ptr },
    })
}

#[derive(Debug, Clone, Copy)]
enum Finished {
    StreamEnded,
    Interrupted,
}

/// Lazily parses the records of a [`LineSource`], one pull at a time.
///
/// The sequence is consumed once; after it reports the end of the stream or
/// an interrupt it keeps doing so.
pub struct Events<S> {
    source: S,
    number: u64,
    finished: Option<Finished>,
}

impl<S: LineSource> Events<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            number: 0,
            finished: None,
        }
    }

    /// Number of records pulled so far.
    pub fn records_read(&self) -> u64 {
        self.number
    }

    /// Blocks until the next record is available and parses it.
    pub fn pull(&mut self) -> Result<Pull<Record>> {
        match self.finished {
            Some(Finished::StreamEnded) => return Ok(Pull::StreamEnded),
            Some(Finished::Interrupted) => return Ok(Pull::Interrupted),
            None => {}
        }
        let line = match self.source.next_line()? {
            Pull::Item(line) => line,
            Pull::StreamEnded => {
                self.finished = Some(Finished::StreamEnded);
                return Ok(Pull::StreamEnded);
            }
            Pull::Interrupted => {
                self.finished = Some(Finished::Interrupted);
                return Ok(Pull::Interrupted);
            }
        };

        self.number += 1;
        let number = self.number;
        trace!(number, record = %line, "pulled record");
        match parse_record(&line) {
            Ok(event) => Ok(Pull::Item(Record { number, event })),
            Err(reason) => Err(Error::MalformedRecord {
                number,
                record: line,
                reason,
            }),
        }
    }
}
