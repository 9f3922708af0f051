//! The `fastsum` binary: install the tracing subscriber, hand the command
//! line to the library, and map the outcome to a process exit code.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("FASTSUM_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(fastsum::cli::main());
}
