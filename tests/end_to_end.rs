use std::collections::VecDeque;
use std::io::{self, Cursor, Write};

use leak_detector::{
    Aggregator, Error, Events, Highlight, Input, InterruptibleSource, LeakReport, LineSource,
    Pull, ReaderSource, StreamEnd,
};

const EXAMPLE: &str = "A\t10\t100\tfile.c:1\tframeA\tframeB\n\
                       A\t20\t50\tfile.c:2\tframeA\tframeB\n\
                       D\t10\n";

/// Replays canned pulls, like a pipe the operator stops with Ctrl+C.
struct Scripted(VecDeque<Pull<String>>);

impl Scripted {
    fn new(lines: &[&str], then: Pull<String>) -> Self {
        let mut pulls: VecDeque<_> = lines.iter().map(|line| Pull::Item(line.to_string())).collect();
        pulls.push_back(then);
        Scripted(pulls)
    }
}

impl LineSource for Scripted {
    fn next_line(&mut self) -> io::Result<Pull<String>> {
        Ok(self.0.pop_front().unwrap_or(Pull::StreamEnded))
    }
}

fn run<S: LineSource>(source: S) -> Result<(StreamEnd, LeakReport), Error> {
    let mut events = Events::new(source);
    let mut aggregator = Aggregator::new();
    let end = aggregator.consume(&mut events)?;
    Ok((end, aggregator.finish()))
}

fn rendered(report: &LeakReport) -> String {
    let mut out = Vec::new();
    report.write_to(&mut out, Highlight::Never).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn example_log_reports_single_group() {
    let (end, report) = run(ReaderSource::new(Cursor::new(EXAMPLE))).unwrap();
    assert_eq!(end, StreamEnd::Exhausted);

    let groups = report.groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].total_size, 50);
    assert_eq!(groups[0].average_size(), 50);
    assert_eq!(groups[0].count, 1);
    assert_eq!(groups[0].source_line, "file.c:2");
    assert_eq!(groups[0].backtrace, vec!["frameA", "frameB"]);

    let text = rendered(&report);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[0].ends_with("| Filename"));
    assert!(lines[2].ends_with("|           1 | file.c:2"));
    assert!(lines[3].ends_with(" | frameA"));
    assert!(lines[4].ends_with(" | frameB"));
    assert_eq!(lines[6], "");
}

#[test]
fn interrupt_reports_what_was_captured() {
    let source = Scripted::new(
        &["A\t1\t64\tbuf.c:10\tgrow\tmain", "A\t2\t32\tbuf.c:10\tgrow\tmain"],
        Pull::Interrupted,
    );
    let (end, report) = run(source).unwrap();
    assert_eq!(end, StreamEnd::Interrupted);
    assert_eq!(report.total_size(), 96);
    assert_eq!(report.groups()[0].average_size(), 48);
}

#[test]
fn interrupt_before_any_record_has_no_leaks() {
    let (end, report) = run(Scripted::new(&[], Pull::Interrupted)).unwrap();
    assert_eq!(end, StreamEnd::Interrupted);
    assert_eq!(rendered(&report), "No leaks!\n");
}

#[test]
fn bad_free_aborts_without_report() {
    let result = run(ReaderSource::new(Cursor::new("A\t1\t8\ta.c:1\nD\t2\n")));
    match result {
        Err(Error::DeallocationOfUntrackedPointer { number, ptr }) => {
            assert_eq!(number, 2);
            assert_eq!(ptr, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_kind_aborts_the_run() {
    let result = run(ReaderSource::new(Cursor::new("A\t1\t8\ta.c:1\nF\t1\n")));
    assert!(matches!(result, Err(Error::UnknownEventKind { number: 2, .. })));
}

#[test]
fn diagnostics_name_the_offending_record() {
    let err = run(ReaderSource::new(Cursor::new("A\tqq\t8\ta.c:1\n"))).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("#1"), "{message}");
    assert!(message.contains("A\\tqq\\t8\\ta.c:1"), "{message}");
}

#[test]
fn reads_log_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(EXAMPLE.as_bytes()).unwrap();
    file.flush().unwrap();

    let source = InterruptibleSource::new(Input::Path(file.path().to_path_buf())).unwrap();
    let (end, report) = run(source).unwrap();
    assert_eq!(end, StreamEnd::Exhausted);
    assert_eq!(report.total_size(), 50);
}
