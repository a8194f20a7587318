//! # hprof - binary to ASCII converter
//!
//! Reads a binary hprof CPU-sampling file in lenient mode and prints the
//! ASCII report. Usage and failure messages go to stdout; the report is
//! rendered in memory first so a failure never leaves partial output.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use hprof::binary::BinaryHprofReader;
use hprof::cli::Args;
use hprof::export::AsciiHprofWriter;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

const USAGE: &str = "usage: hprof <binary-hprof-file>";

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            // Help and version are not failures
            if let Err(err) = e.print() {
                debug!("Failed to print {:?} output: {err}", e.kind());
            }
            std::process::exit(EXIT_SUCCESS);
        }
        Err(e) => usage(e.kind().as_str().unwrap_or("binary hprof file argument expected")),
    };

    if !args.file.is_file() {
        usage(&format!("file {} does not exist", args.file.display()));
    }

    std::process::exit(match run(&args.file) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            println!("{e:#}");
            EXIT_ERROR
        }
    });
}

fn usage(message: &str) -> ! {
    println!("ERROR: {message}");
    println!();
    println!("{USAGE}");
    std::process::exit(EXIT_ERROR);
}

fn run(path: &Path) -> Result<()> {
    let problem = || format!("Problem reading binary hprof data from {}", path.display());

    let file = File::open(path).with_context(problem)?;
    let mut reader = BinaryHprofReader::new(BufReader::new(file));
    reader.set_strict(false).with_context(problem)?;
    reader.read().with_context(problem)?;
    info!("Read hprof {} from {}", reader.version().with_context(problem)?, path.display());
    let data = reader.into_hprof_data().with_context(problem)?;
    debug!("{} stack traces, {} thread events", data.stack_trace_count(), data.thread_history().len());

    let mut report = Vec::new();
    AsciiHprofWriter::write(&data, &mut report).context("Problem writing ascii hprof data")?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&report).context("Problem writing ascii hprof data")?;
    stdout.flush().context("Problem writing ascii hprof data")?;
    Ok(())
}
