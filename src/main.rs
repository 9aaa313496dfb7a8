#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]

use anyhow::{Context, Result};
use clap::Parser;
use msbuild_unpack::{Analyzer, DuplicatePolicy, Options};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "msbuild-unpack")]
#[command(about = "Decode the batch script, tasks and modules hidden in a malicious MSBuild project")]
struct Cli {
    /// Suspicious project file
    path: PathBuf,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Abort when a task name is declared more than once
    #[arg(long)]
    strict: bool,

    /// Write every decoded module to this directory as <sha1>.bin
    #[arg(long, env = "MSBUILD_UNPACK_DUMP")]
    dump: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    // The file is hostile; do not insist on clean UTF-8
    let bytes =
        fs::read(&cli.path).with_context(|| format!("Unable to read {}", cli.path.display()))?;
    let content = String::from_utf8_lossy(&bytes);

    let options = Options {
        duplicate_policy: if cli.strict {
            DuplicatePolicy::Reject
        } else {
            DuplicatePolicy::KeepLast
        },
    };
    let analysis = Analyzer::new(options)
        .analyze(&content)
        .with_context(|| format!("Unable to parse {}", cli.path.display()))?;

    if let Some(dir) = &cli.dump {
        let written = analysis
            .dump(dir)
            .with_context(|| format!("Unable to dump modules to {}", dir.display()))?;
        info!("Wrote {} module(s) to {}", written.len(), dir.display());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &analysis)?;
        writeln!(out)?;
    } else {
        analysis.render(&mut out)?;
    }

    Ok(())
}
