//! Blocking, pull-based sources of raw allocation log lines.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::task::Poll;

use futures::future::{BoxFuture, FutureExt};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::runtime::{self, Runtime};
use tokio::signal;
use tracing::{debug, warn};

/// Outcome of pulling from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    Item(T),
    /// The input has no more data.
    StreamEnded,
    /// The operator asked to stop reading. Not an error.
    Interrupted,
}

/// A stream of raw records, one per line, in the order the producer wrote them.
pub trait LineSource {
    /// Blocks until the next line is available. The line terminator is stripped.
    fn next_line(&mut self) -> io::Result<Pull<String>>;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn next_line(&mut self) -> io::Result<Pull<String>> {
        (**self).next_line()
    }
}

/// Reads lines from any buffered reader. Never reports an interrupt.
pub struct ReaderSource<R> {
    lines: io::Lines<R>,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> io::Result<Pull<String>> {
        match self.lines.next() {
            Some(line) => line.map(Pull::Item),
            None => Ok(Pull::StreamEnded),
        }
    }
}

/// Where an [`InterruptibleSource`] reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    Path(PathBuf),
}

impl Input {
    /// `-` selects stdin, anything else is a path.
    pub fn from_arg(arg: &Path) -> Self {
        if arg == Path::new("-") {
            Input::Stdin
        } else {
            Input::Path(arg.to_path_buf())
        }
    }
}

type AsyncLines = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// Reads a file, pipe or stdin and stops cleanly on Ctrl+C.
///
/// Reads run on a single-threaded tokio runtime owned by the source. Each
/// blocking `next_line` races the read against the interrupt signal, so an
/// operator can end a capture from a pipe whose writer never closes. The
/// input is opened lazily on the first pull, since opening a FIFO blocks
/// until a writer shows up.
pub struct InterruptibleSource {
    runtime: Option<Runtime>,
    input: Input,
    lines: Option<AsyncLines>,
    interrupt: Option<BoxFuture<'static, io::Result<()>>>,
    interrupted: bool,
}

impl InterruptibleSource {
    pub fn new(input: Input) -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // Install the handler now rather than on the first read, so Ctrl+C
        // is already captured while waiting for a pipe writer.
        let mut interrupt = signal::ctrl_c().boxed();
        let mut interrupted = false;
        let installed = match runtime.block_on(async { futures::poll!(&mut interrupt) }) {
            Poll::Pending => Some(interrupt),
            Poll::Ready(Ok(())) => {
                interrupted = true;
                None
            }
            Poll::Ready(Err(err)) => {
                warn!("Ctrl+C handling unavailable: {err}");
                None
            }
        };

        Ok(Self {
            runtime: Some(runtime),
            input,
            lines: None,
            interrupt: installed,
            interrupted,
        })
    }
}

async fn open(input: &Input) -> io::Result<AsyncLines> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Input::Stdin => Box::new(tokio::io::stdin()),
        Input::Path(path) => Box::new(File::open(path).await?),
    };
    Ok(BufReader::new(reader).lines())
}

/// Resolves when the interrupt fires. If the signal handler fails the
/// source simply never reports an interrupt.
async fn wait_for_interrupt(interrupt: &mut Option<BoxFuture<'static, io::Result<()>>>) {
    if let Some(pending) = interrupt.as_mut() {
        if let Err(err) = pending.await {
            warn!("Ctrl+C handling unavailable: {err}");
            *interrupt = None;
        } else {
            return;
        }
    }
    futures::future::pending::<()>().await
}

async fn pull_line(
    input: &Input,
    lines: &mut Option<AsyncLines>,
    interrupt: &mut Option<BoxFuture<'static, io::Result<()>>>,
) -> io::Result<Pull<String>> {
    if lines.is_none() {
        debug!(?input, "opening allocation log");
        tokio::select! {
            biased;
            _ = wait_for_interrupt(interrupt) => return Ok(Pull::Interrupted),
            opened = open(input) => *lines = Some(opened?),
        }
    }
    let reader = match lines.as_mut() {
        Some(reader) => reader,
        None => return Ok(Pull::StreamEnded),
    };
    tokio::select! {
        biased;
        _ = wait_for_interrupt(interrupt) => Ok(Pull::Interrupted),
        line = reader.next_line() => Ok(line?.map_or(Pull::StreamEnded, Pull::Item)),
    }
}

impl LineSource for InterruptibleSource {
    fn next_line(&mut self) -> io::Result<Pull<String>> {
        if self.interrupted {
            return Ok(Pull::Interrupted);
        }
        let runtime = match self.runtime.as_ref() {
            Some(runtime) => runtime,
            None => return Ok(Pull::StreamEnded),
        };

        let pulled = runtime.block_on(pull_line(&self.input, &mut self.lines, &mut self.interrupt));
        if let Ok(Pull::Interrupted) = pulled {
            debug!("interrupted while reading allocation log");
            self.interrupted = true;
            self.interrupt = None;
        }
        pulled
    }
}

impl Drop for InterruptibleSource {
    fn drop(&mut self) {
        // A read may still be parked on the blocking pool waiting for a pipe
        // writer; do not wait for it.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_source_strips_terminators() {
        let mut source = ReaderSource::new(Cursor::new("D\t1\r\nD\t2\n"));
        assert_eq!(source.next_line().unwrap(), Pull::Item("D\t1".to_string()));
        assert_eq!(source.next_line().unwrap(), Pull::Item("D\t2".to_string()));
        assert_eq!(source.next_line().unwrap(), Pull::StreamEnded);
        assert_eq!(source.next_line().unwrap(), Pull::StreamEnded);
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(Input::from_arg(Path::new("-")), Input::Stdin);
        assert_eq!(
            Input::from_arg(Path::new("/tmp/log")),
            Input::Path(PathBuf::from("/tmp/log"))
        );
    }

    #[test]
    fn interruptible_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"A\t10\t1\tf.c:1\nD\t10\n").unwrap();

        let mut source = InterruptibleSource::new(Input::Path(file.path().to_path_buf())).unwrap();
        assert_eq!(
            source.next_line().unwrap(),
            Pull::Item("A\t10\t1\tf.c:1".to_string())
        );
        assert_eq!(source.next_line().unwrap(), Pull::Item("D\t10".to_string()));
        assert_eq!(source.next_line().unwrap(), Pull::StreamEnded);
    }

    #[test]
    fn interruptible_source_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = InterruptibleSource::new(Input::Path(dir.path().join("absent"))).unwrap();
        let err = source.next_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
