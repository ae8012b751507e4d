// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Command-line entry point for WCBT.
//!
//! This is a thin shell over the engine: parse arguments, run one
//! pipeline, map its outcome to the stable exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use wcbt::errors::exit_code;
use wcbt::{
    backup, restore, verify_run, BackupOptions, RestoreOptions, RunStatus, StageVerifyMode,
};

mod log;

#[derive(Debug, Parser)]
#[command(
    name = "wcbt",
    about = "A deterministic backup, restore, and verify tool for local directory trees",
    author,
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Set the log level to trace.
    #[arg(long, short = 'D', global = true)]
    debug: bool,

    /// Path to an output log file.
    #[arg(long, short = 'L', global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a source directory into a new run under the destination root.
    Backup {
        /// Source directory to copy from.
        #[arg(long)]
        source: PathBuf,
        /// Destination root that receives the run directory.
        #[arg(long)]
        dest: PathBuf,
        /// Plan and journal without publishing payload files or a manifest.
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconstitute a run at a new destination, add-only.
    Restore {
        /// Path of the run's manifest.json.
        #[arg(long)]
        manifest: PathBuf,
        /// Directory to restore into; an existing one is preserved aside.
        #[arg(long)]
        dest: PathBuf,
        /// Plan and record without staging or promoting.
        #[arg(long)]
        dry_run: bool,
        /// Stage checks to run before promotion.
        #[arg(long, value_enum, default_value_t)]
        verify: VerifyMode,
    },

    /// Check a run's payload against the hashes in its manifest.
    Verify {
        /// Path of the run directory.
        #[arg(long)]
        run: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum VerifyMode {
    None,
    #[default]
    Size,
}

impl From<VerifyMode> for StageVerifyMode {
    fn from(mode: VerifyMode) -> StageVerifyMode {
        match mode {
            VerifyMode::None => StageVerifyMode::None,
            VerifyMode::Size => StageVerifyMode::Size,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match log::init(log::LoggingOptions {
        debug: args.debug,
        log_file: args.log_file.as_deref(),
    }) {
        Ok(guard) => guard,
        Err(message) => {
            eprintln!("wcbt: {message}");
            return ExitCode::from(exit_code::FATAL);
        }
    };

    let code = match args.command {
        Command::Backup {
            source,
            dest,
            dry_run,
        } => {
            let options = BackupOptions {
                dry_run,
                ..BackupOptions::default()
            };
            match backup(&source, &dest, &options) {
                Ok(stats) => {
                    match stats.run_status {
                        RunStatus::Ok => println!(
                            "backup {}: {} files copied",
                            stats.run_id, stats.files_copied
                        ),
                        RunStatus::Partial => println!(
                            "backup {} partial: {} copied, {} failed",
                            stats.run_id, stats.files_copied, stats.files_failed
                        ),
                    }
                    stats.exit_code()
                }
                Err(err) => report(err),
            }
        }
        Command::Restore {
            manifest,
            dest,
            dry_run,
            verify,
        } => {
            let options = RestoreOptions {
                dry_run,
                verify: verify.into(),
                ..RestoreOptions::default()
            };
            match restore(&manifest, &dest, &options) {
                Ok(stats) => {
                    if stats.dry_run {
                        println!("restore {} dry run: nothing promoted", stats.run_id);
                    } else {
                        println!(
                            "restore {}: {} files to {}",
                            stats.run_id,
                            stats.files_restored,
                            stats.destination.display()
                        );
                        if let Some(previous) = &stats.previous_root {
                            println!("prior destination preserved at {}", previous.display());
                        }
                    }
                    exit_code::OK
                }
                Err(err) => report(err),
            }
        }
        Command::Verify { run } => match verify_run(&run) {
            Ok(outcome) => {
                println!(
                    "verify {}: {} ok, {} missing, {} unreadable, {} hash mismatch",
                    outcome.run_id,
                    outcome.counts.ok,
                    outcome.counts.missing,
                    outcome.counts.unreadable,
                    outcome.counts.hash_mismatch
                );
                outcome.exit_code()
            }
            Err(err) => report(err),
        },
    };
    ExitCode::from(code)
}

/// Log the failure and map it to its exit code. Artifacts, not stack
/// traces, are the primary failure signal.
fn report(err: wcbt::Error) -> u8 {
    error!("{err}");
    eprintln!("wcbt: {err}");
    err.exit_code()
}
