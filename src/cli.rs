//! Command-line surface.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

use crate::output::OutputStreams;
use crate::pipeline::{self, Options};

#[derive(Parser, Debug)]
#[command(
    name = "fastsum",
    version,
    about = "Parallel two-level SHA-256 digests for files and directory trees"
)]
pub struct Args {
    /// Number of hashing threads; defaults to the number of CPU cores
    #[arg(short = 'w', long, value_name = "N")]
    pub hash_workers: Option<usize>,

    /// Number of file reader threads
    #[arg(short = 'f', long, value_name = "N", default_value_t = 16)]
    pub file_workers: usize,

    /// Files and directories to hash
    #[arg(value_name = "FILE", required = true)]
    pub paths: Vec<String>,
}

/// Parse the command line and run the pipeline. Returns the process exit
/// code: per-file errors still exit 0; only an unusable command line
/// exits 1.
pub fn main() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => return report_usage(error),
    };
    let options = Options {
        file_workers: args.file_workers,
        hash_workers: args
            .hash_workers
            .unwrap_or_else(pipeline::default_hash_workers),
    };
    let paths: Vec<PathBuf> = args
        .paths
        .iter()
        .map(|path| without_trailing_slashes(path))
        .collect();
    pipeline::run(&paths, &options, OutputStreams::os());
    0
}

fn report_usage(error: clap::Error) -> i32 {
    match error.kind() {
        // Conventional informational exits.
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            0
        }
        // Bad invocations put the usage on stdout and exit 1.
        _ => {
            let _ = write!(io::stdout(), "{}", error.render());
            1
        }
    }
}

/// `dir/` and `dir` name the same thing; normalize so the printed path
/// matches what the user typed minus the separator.
fn without_trailing_slashes(arg: &str) -> PathBuf {
    let trimmed = arg.trim_end_matches('/');
    if trimmed.is_empty() && !arg.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}
