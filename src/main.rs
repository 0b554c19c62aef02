use anyhow::{ensure, Context, Result};
use clap::Parser;
use owo_colors::Stream;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use leak_detector::{fifo, Aggregator, Events, Highlight, Input, InterruptibleSource, StreamEnd};

const DEFAULT_LOG_PATH: &str = "/tmp/leak_detector_alloc";

/// Report allocations an instrumented process never freed
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Allocation log to read, `-` for stdin
    #[clap(value_name = "PATH", default_value = DEFAULT_LOG_PATH, parse(from_os_str))]
    log_path: PathBuf,
    /// Create a FIFO at PATH and capture until Ctrl+C
    #[clap(long)]
    pipe: bool,
    /// Never highlight the report
    #[clap(long)]
    no_color: bool,
    /// Log more, repeat for more detail
    #[clap(short, long, parse(from_occurrences))]
    verbose: u8,
    /// Only log errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let input = Input::from_arg(&args.log_path);
    // Created before the FIFO so Ctrl+C is caught while waiting for a writer.
    let source = InterruptibleSource::new(input.clone()).context("failed to start reader")?;

    if args.pipe {
        ensure!(input != Input::Stdin, "--pipe needs a path, not stdin");
        fifo::create(&args.log_path).with_context(|| {
            format!("failed to create FIFO at {}", args.log_path.display())
        })?;
        println!("Capturing allocations, press Ctrl+C to stop...");
    }

    let mut events = Events::new(source);
    let mut aggregator = Aggregator::new();
    let end = aggregator
        .consume(&mut events)
        .with_context(|| format!("failed to analyze {}", args.log_path.display()))?;
    let records = events.records_read();
    drop(events);

    if end == StreamEnd::Interrupted {
        info!("interrupted, reporting what was captured so far");
    }
    let report = aggregator.finish();
    info!(
        records,
        leaked_allocations = report.allocation_count(),
        leaked_bytes = report.total_size(),
        groups = report.groups().len(),
        ?end,
        "analysis complete"
    );

    let highlight = if args.no_color {
        Highlight::Never
    } else {
        Highlight::IfSupported(Stream::Stdout)
    };
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    report
        .write_to(&mut stdout, highlight)
        .and_then(|()| stdout.flush())
        .context("failed to write report")?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_writer(io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {err}");
    }

    if let Err(err) = run(&args) {
        error!("{err:#}");
        process::exit(1);
    }
}
