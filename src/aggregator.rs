use std::collections::HashMap;

use ahash::RandomState;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Allocation, Event, Events, Record};
use crate::report::LeakReport;
use crate::source::{LineSource, Pull};

/// A live allocation and the number of the record that last wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntry {
    pub allocation: Allocation,
    pub written_at: u64,
}

/// Pointers currently believed allocated and not yet freed.
#[derive(Debug, Default)]
pub struct LiveAllocations {
    entries: HashMap<u64, LiveEntry, RandomState>,
}

impl LiveAllocations {
    /// Last write wins: an existing entry for the same pointer is replaced.
    fn upsert(&mut self, allocation: Allocation, written_at: u64) -> Option<LiveEntry> {
        self.entries.insert(
            allocation.ptr,
            LiveEntry {
                allocation,
                written_at,
            },
        )
    }

    fn remove(&mut self, ptr: u64) -> Option<LiveEntry> {
        self.entries.remove(&ptr)
    }

    pub fn get(&self, ptr: u64) -> Option<&LiveEntry> {
        self.entries.get(&ptr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u128 {
        self.entries
            .values()
            .map(|entry| u128::from(entry.allocation.size))
            .sum()
    }

    /// Iterates in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &LiveEntry> {
        self.entries.values()
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = LiveEntry> {
        self.entries.into_values()
    }
}

/// How the running phase ended. Both lead to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Exhausted,
    Interrupted,
}

/// Owns the live allocation table for one run.
///
/// Records are applied in stream order by [`Aggregator::apply`] or, for a
/// whole stream, [`Aggregator::consume`]. [`Aggregator::finish`] consumes the
/// aggregator and builds the report, so nothing can be applied afterwards.
#[derive(Debug, Default)]
pub struct Aggregator {
    live: LiveAllocations,
    applied: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> &LiveAllocations {
        &self.live
    }

    /// Number of records applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn apply(&mut self, record: Record) -> Result<()> {
        let Record { number, event } = record;
        match event {
            Event::Allocate(allocation) | Event::Reallocate(allocation) => {
                let ptr = allocation.ptr;
                if let Some(previous) = self.live.upsert(allocation, number) {
                    trace!(
                        number,
                        ptr,
                        previous_size = previous.allocation.size,
                        "replaced live allocation"
                    );
                }
            }
            Event::Deallocate { ptr } => {
                if self.live.remove(ptr).is_none() {
                    return Err(Error::DeallocationOfUntrackedPointer { number, ptr });
                }
            }
            Event::Unknown { tag, .. } => return Err(Error::UnknownEventKind { number, tag }),
        }
        self.applied += 1;
        Ok(())
    }

    /// Applies records until the stream is exhausted or interrupted.
    pub fn consume<S: LineSource>(&mut self, events: &mut Events<S>) -> Result<StreamEnd> {
        loop {
            match events.pull()? {
                Pull::Item(record) => self.apply(record)?,
                Pull::StreamEnded => return Ok(StreamEnd::Exhausted),
                Pull::Interrupted => {
                    debug!(applied = self.applied, "stopped reading on interrupt");
                    return Ok(StreamEnd::Interrupted);
                }
            }
        }
    }

    pub fn finish(self) -> LeakReport {
        debug!(
            applied = self.applied,
            live = self.live.len(),
            "building leak report"
        );
        LeakReport::from_live(self.live)
    }
}
