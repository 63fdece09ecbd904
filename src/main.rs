use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use assasdb::convert::worker::run_conversion;
use assasdb::db::catalogue;
use assasdb::db::open::open_db;
use assasdb::db::record::DatasetStatus;
use assasdb::orchestrator::Orchestrator;
use assasdb::slurm::scheduler::SlurmScheduler;
use assasdb::WorkingDirectory;

#[derive(Parser)]
#[command(name = "assasdb")]
#[command(about = "Convert ASTEC result archives to HDF5 and track them in a catalogue")]
struct Cli {
    /// Directory holding the catalogue database and per-dataset job directories
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a result archive in the catalogue
    Register {
        /// Path to the ASTEC result archive
        #[arg(long)]
        archive: PathBuf,
    },
    /// Submit conversion jobs to SLURM and poll until they finish
    Submit {
        /// Dataset identifier to submit
        #[arg(long, conflicts_with = "all_pending")]
        id: Option<String>,
        /// Submit every pending dataset
        #[arg(long)]
        all_pending: bool,
        /// Seconds between scheduler polls
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Automatic resubmissions after transient scheduler failures
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },
    /// Reconcile outstanding SLURM jobs into the catalogue
    Poll {
        /// Run a single reconciliation pass instead of polling until done
        #[arg(long)]
        once: bool,
        /// Seconds between scheduler polls
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Automatic resubmissions after transient scheduler failures
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },
    /// Run one conversion in-process (the SLURM worker entry point)
    Convert {
        /// Dataset identifier to convert
        #[arg(long)]
        id: String,
    },
    /// Show catalogue records
    Status {
        /// Only show records with this status
        #[arg(long, value_enum)]
        filter: Option<DatasetStatus>,
    },
    /// Ask the scheduler to cancel a submitted or running conversion
    Cancel {
        /// Dataset identifier to cancel
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let wd = WorkingDirectory {
        path: cli.work_dir.clone(),
    };
    let conn = open_db(&wd).context("open catalogue database")?;

    match cli.command {
        Command::Register { archive } => {
            let id = catalogue::register(&conn, &archive.display().to_string())?;
            println!("{id}");
        }
        Command::Submit {
            id,
            all_pending,
            interval,
            max_attempts,
        } => {
            let mut orchestrator = Orchestrator::new(SlurmScheduler::default(), max_attempts);
            orchestrator.recover(&conn)?;

            let candidates: Vec<String> = match id {
                Some(id) => vec![id],
                None if all_pending => catalogue::list_by_status(&conn, DatasetStatus::Pending)?
                    .into_iter()
                    .map(|record| record.uuid)
                    .collect(),
                None => anyhow::bail!("pass --id <uuid> or --all-pending"),
            };
            if candidates.is_empty() && orchestrator.outstanding() == 0 {
                info!("Nothing to submit");
                return Ok(());
            }

            for id in &candidates {
                orchestrator.submit(&conn, &wd, id)?;
            }
            orchestrator
                .run(&conn, &wd, Duration::from_secs(interval))
                .await?;
        }
        Command::Poll {
            once,
            interval,
            max_attempts,
        } => {
            let mut orchestrator = Orchestrator::new(SlurmScheduler::default(), max_attempts);
            orchestrator.recover(&conn)?;
            if once {
                orchestrator.poll_once(&conn, &wd)?;
            } else {
                orchestrator
                    .run(&conn, &wd, Duration::from_secs(interval))
                    .await?;
            }
        }
        Command::Convert { id } => run_conversion(&conn, &wd, &id)?,
        Command::Status { filter } => {
            let records = match filter {
                Some(status) => catalogue::list_by_status(&conn, status)?,
                None => catalogue::list_all(&conn)?,
            };
            for record in records {
                println!(
                    "{}  {:<9}  {}  {}",
                    record.uuid,
                    record.status,
                    record.archive_path,
                    record.detail.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Cancel { id } => {
            let mut orchestrator = Orchestrator::new(SlurmScheduler::default(), 0);
            orchestrator.recover(&conn)?;
            orchestrator.cancel(&conn, &id)?;
            info!("Cancellation requested; the record moves to failed once confirmed by a poll");
        }
    }

    Ok(())
}
