//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hprof",
    version,
    about = "Convert a binary hprof CPU-sampling file to the ASCII report",
    after_help = "\
EXAMPLES:
    hprof cpu.hprof                  Print the report to stdout
    RUST_LOG=debug hprof cpu.hprof   Log every record while reading"
)]
pub struct Args {
    /// Binary hprof file to convert
    #[arg(value_name = "binary-hprof-file")]
    pub file: PathBuf,
}
