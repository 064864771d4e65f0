use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;
use logroll::{RotatingWriter, SinkConfig};

#[derive(Parser)]
#[command(name = "logroll")]
#[command(about = "Append stdin to a size-rotated, compressed, retention-pruned log file")]
struct Cli {
    /// Canonical log file path (default ./log/logger.log)
    #[arg(long)]
    path: Option<PathBuf>,

    /// JSON sink config; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rotate once the file passes this many bytes (0 disables rotation)
    #[arg(long)]
    max_size: Option<u64>,

    /// Delete files older than this, e.g. "7d" or "12h" (0s keeps everything)
    #[arg(long, value_parser = humantime::parse_duration)]
    max_age: Option<Duration>,

    /// Leave rotated files uncompressed
    #[arg(long)]
    no_compress: bool,

    /// Upper bound on waiting for compression at exit, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    close_timeout: Option<Duration>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SinkConfig::from_json_file(path)?,
        None => SinkConfig::default(),
    };
    if let Some(path) = cli.path {
        config.path = path;
    }
    if let Some(max_size) = cli.max_size {
        config.max_size = max_size;
    }
    if let Some(max_age) = cli.max_age {
        config.max_age = max_age;
    }
    if cli.no_compress {
        config.compress = false;
    }
    if let Some(close_timeout) = cli.close_timeout {
        config.close_timeout = close_timeout;
    }

    info!("Writing to {}", config.path.display());
    let sink = RotatingWriter::new(config)?;

    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        sink.append(&line)?;
    }

    sink.close()?;
    info!("Rotated {} times", sink.rotations());
    Ok(())
}
