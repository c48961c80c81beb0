use clap::{Parser, Subcommand};
use frag_backup::backup::backup_config::{load_config, BackupConfig};
use frag_backup::backup::restore_config::RestoreConfig;
use frag_backup::backup::result_error::error::Error;
use frag_backup::backup::result_error::result::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};

/// Backs up directories into fragmentable containers and restores them
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Print the final report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a container from the configured sources and store it
    Backup {
        /// Location of the backup job file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fetch a stored container and extract it
    Restore {
        /// Location of the restore job file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn print_report<T: Serialize>(report: &T, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).map_err(std::io::Error::from)?
        );
    }
    Ok(())
}

fn run(args: &Args) -> Result<bool> {
    match &args.command {
        Command::Backup { config } => {
            let report = load_config::<BackupConfig>(config)?.execute()?;
            info!(
                "Backup done: {} files, stored at {:?}",
                report.member_count, report.stored
            );
            print_report(&report, args.json)?;
            Ok(true)
        }
        Command::Restore { config } => {
            let report = load_config::<RestoreConfig>(config)?.execute()?;
            let summary = report.summary();
            if report.is_complete() {
                info!("Restore done: {}", summary.files);
            } else {
                warn!("Restore finished with failures: {}", summary.files);
            }
            print_report(&summary, args.json)?;
            Ok(report.is_complete())
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(&args) {
        Ok(true) => {}
        // partial restore: everything that could be extracted is on disk
        Ok(false) => exit(2),
        Err(e) => {
            error!("{e}");
            exit(exit_code(&e));
        }
    }
}

fn exit_code(e: &Error) -> i32 {
    use frag_backup::backup::result_error::error::ErrorKind;
    match e.kind() {
        ErrorKind::AuthFailure => 3,
        _ => 1,
    }
}
