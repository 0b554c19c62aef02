//! Finds allocations an instrumented process never freed.
//!
//! The process writes one record per allocator call (see [`event`]). The
//! [`Aggregator`] replays them into a table of live allocations and, once
//! the stream ends or is interrupted, groups the survivors by backtrace into
//! a ranked [`LeakReport`].

pub mod aggregator;
pub mod error;
pub mod event;
pub mod fifo;
pub mod report;
pub mod source;

pub use aggregator::{Aggregator, LiveAllocations, LiveEntry, StreamEnd};
pub use error::{Error, ParseError, Result};
pub use event::{parse_record, Allocation, Event, EventKind, Events, Record};
pub use report::{Highlight, LeakGroup, LeakReport};
pub use source::{Input, InterruptibleSource, LineSource, Pull, ReaderSource};
