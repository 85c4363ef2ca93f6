//! Sorts newline-delimited records from a file using the crate's own
//! `FsBackend` adapter. A manual smoke-test harness for the core sort
//! engine, not part of it.

use clap::{Parser, ValueEnum};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process;
use xsort::{
    sort_listfile, DuplicatePolicy, FsBackend, GetRecord, PutRecord, RecordSink, RecordSource,
    SortConfig,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DuplicateArg {
    Eliminate,
    Link,
}

#[derive(Parser, Debug)]
#[command(name = "xsort", about = "Sort newline-delimited records from a file")]
struct Cli {
    /// Input file, one record per line.
    input: String,

    /// Output file; defaults to stdout.
    #[arg(short, long)]
    output: Option<String>,

    /// How duplicate lines are handled.
    #[arg(long, value_enum, default_value_t = DuplicateArg::Eliminate)]
    duplicates: DuplicateArg,

    /// Target arena size, in pages.
    #[arg(long, default_value_t = 64)]
    buffer_pages: usize,

    /// Page size in bytes.
    #[arg(long, default_value_t = 16 * 1024)]
    page_size: usize,

    /// Reverse the sort order.
    #[arg(long)]
    reverse: bool,

    /// Log level passed to `tracing_subscriber::EnvFilter`.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

struct LineSource {
    reader: BufReader<File>,
}

impl RecordSource for LineSource {
    fn get_record(&mut self, buf: &mut Vec<u8>) -> GetRecord {
        match self.reader.read_until(b'\n', buf) {
            Ok(0) => GetRecord::EndOfStream,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                GetRecord::Success(buf.len())
            }
            Err(e) => GetRecord::Error(e.to_string()),
        }
    }
}

struct LineSink<W: Write> {
    writer: W,
}

impl<W: Write> RecordSink for LineSink<W> {
    fn put_record(&mut self, record: &[u8]) -> PutRecord {
        if let Err(e) = self.writer.write_all(record) {
            return PutRecord::Error(e.to_string());
        }
        if let Err(e) = self.writer.write_all(b"\n") {
            return PutRecord::Error(e.to_string());
        }
        PutRecord::Ok
    }
}

fn byte_comparator(reverse: bool) -> impl FnMut(&[u8], &[u8]) -> Ordering {
    move |a, b| {
        let ord = a.cmp(b);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    }
}

fn run(cli: Cli) -> xsort::Result<()> {
    let config = SortConfig {
        page_size: cli.page_size,
        sort_buffer_pages: cli.buffer_pages,
        duplicate_policy: match cli.duplicates {
            DuplicateArg::Eliminate => DuplicatePolicy::Eliminate,
            DuplicateArg::Link => DuplicatePolicy::Link,
        },
        ..SortConfig::default_config()
    };

    let input_file = File::open(&cli.input).map_err(xsort::SortError::Io)?;
    let estimated_input_pages =
        (input_file.metadata().map_err(xsort::SortError::Io)?.len() / cli.page_size as u64) as u32;
    let mut source = LineSource {
        reader: BufReader::new(input_file),
    };

    let mut backend = FsBackend::new(cli.page_size)?;
    let mut cmp = byte_comparator(cli.reverse);

    match cli.output {
        Some(path) => {
            let file = File::create(path).map_err(xsort::SortError::Io)?;
            let mut sink = LineSink {
                writer: BufWriter::new(file),
            };
            let report = sort_listfile(
                &config,
                &mut backend,
                &mut source,
                &mut sink,
                &mut cmp,
                estimated_input_pages,
            )?;
            sink.writer.flush().map_err(xsort::SortError::Io)?;
            tracing::info!(?report, "sort complete");
        }
        None => {
            let mut sink = LineSink {
                writer: BufWriter::new(io::stdout()),
            };
            let report = sort_listfile(
                &config,
                &mut backend,
                &mut source,
                &mut sink,
                &mut cmp,
                estimated_input_pages,
            )?;
            sink.writer.flush().map_err(xsort::SortError::Io)?;
            tracing::info!(?report, "sort complete");
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = xsort::init_logging(&cli.log_level) {
        eprintln!("warning: failed to initialize logging: {e}");
    }
    if let Err(e) = run(cli) {
        eprintln!("xsort: {e}");
        process::exit(1);
    }
}
