//! Grouping, ranking and rendering of the allocations left alive at the end
//! of a run.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};

use ahash::RandomState;
use owo_colors::{OwoColorize, Stream};

use crate::aggregator::{LiveAllocations, LiveEntry};
use crate::event::Allocation;

/// Live allocations sharing one backtrace, frame for frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakGroup {
    /// Wide enough that summing any number of `u64` sizes cannot overflow.
    pub total_size: u128,
    pub count: u64,
    /// Source line of the member whose latest write came first in the stream.
    pub source_line: String,
    pub backtrace: Vec<String>,
}

impl LeakGroup {
    /// Floor of the mean size, 0 for an empty group.
    pub fn average_size(&self) -> u64 {
        self.total_size
            .checked_div(u128::from(self.count))
            .map_or(0, |average| u64::try_from(average).unwrap_or(u64::MAX))
    }

    /// Largest total first, then source line, then backtrace.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .total_size
            .cmp(&self.total_size)
            .then_with(|| self.source_line.cmp(&other.source_line))
            .then_with(|| self.backtrace.cmp(&other.backtrace))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeakReport {
    NoLeaks,
    /// Non-empty, ranked.
    Leaks(Vec<LeakGroup>),
}

struct Partial {
    total_size: u128,
    count: u64,
    source_line: String,
}

impl LeakReport {
    pub(crate) fn from_live(live: LiveAllocations) -> Self {
        if live.is_empty() {
            return LeakReport::NoLeaks;
        }

        let mut entries: Vec<LiveEntry> = live.into_entries().collect();
        entries.sort_by_key(|entry| entry.written_at);

        let mut by_backtrace: HashMap<Vec<String>, Partial, RandomState> = HashMap::default();
        for entry in entries {
            let Allocation {
                size,
                source_line,
                backtrace,
                ..
            } = entry.allocation;
            let partial = by_backtrace.entry(backtrace).or_insert_with(|| Partial {
                total_size: 0,
                count: 0,
                source_line,
            });
            partial.total_size += u128::from(size);
            partial.count += 1;
        }

        let mut groups: Vec<LeakGroup> = by_backtrace
            .into_iter()
            .map(|(backtrace, partial)| LeakGroup {
                total_size: partial.total_size,
                count: partial.count,
                source_line: partial.source_line,
                backtrace,
            })
            .collect();
        groups.sort_by(LeakGroup::rank);
        LeakReport::Leaks(groups)
    }

    pub fn groups(&self) -> &[LeakGroup] {
        match self {
            LeakReport::NoLeaks => &[],
            LeakReport::Leaks(groups) => groups,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, LeakReport::NoLeaks)
    }

    pub fn total_size(&self) -> u128 {
        self.groups().iter().map(|group| group.total_size).sum()
    }

    pub fn allocation_count(&self) -> u64 {
        self.groups().iter().map(|group| group.count).sum()
    }

    fn lines(&self) -> Vec<(Style, String)> {
        let groups = match self {
            LeakReport::NoLeaks => return vec![(Style::Plain, "No leaks!".to_string())],
            LeakReport::Leaks(groups) => groups,
        };

        let mut lines = vec![
            (
                Style::Strong,
                format!(
                    "{:>20} | {:>20} | {:>11} | Filename",
                    "Total size", "Average size", "Allocations"
                ),
            ),
            (
                Style::Faint,
                format!("{:=<20}=+={:=<20}=+={:=<11}=+={:=<64}", "", "", "", ""),
            ),
        ];
        for group in groups {
            lines.push((
                Style::Strong,
                format!(
                    "{:20} | {:20} | {:11} | {}",
                    group.total_size,
                    group.average_size(),
                    group.count,
                    group.source_line
                ),
            ));
            for frame in &group.backtrace {
                lines.push((
                    Style::Plain,
                    format!("{:20} | {:20} | {:11} | {}", "", "", "", frame),
                ));
            }
            lines.push((
                Style::Faint,
                format!("{:-<20}-+-{:-<20}-+-{:-<11}-+-{:-<64}", "", "", "", ""),
            ));
        }
        lines.push((Style::Plain, String::new()));
        lines
    }

    /// Writes the report. With [`Highlight::IfSupported`], header and group
    /// rows are bold and rules dimmed when the named stream supports colors,
    /// so pass the stream `out` actually ends up on. The text is identical
    /// either way.
    pub fn write_to<W: Write>(&self, out: &mut W, highlight: Highlight) -> io::Result<()> {
        for (style, line) in self.lines() {
            match (highlight, style) {
                (Highlight::Never, _) | (_, Style::Plain) => writeln!(out, "{line}")?,
                (Highlight::IfSupported(stream), Style::Strong) => writeln!(
                    out,
                    "{}",
                    line.if_supports_color(stream, |text| text.bold())
                )?,
                (Highlight::IfSupported(stream), Style::Faint) => writeln!(
                    out,
                    "{}",
                    line.if_supports_color(stream, |text| text.dimmed())
                )?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, line) in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub enum Highlight {
    Never,
    /// Only when this stream supports colors.
    IfSupported(Stream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Plain,
    Strong,
    Faint,
}
