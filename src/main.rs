use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cycle_tracker::dates::{format_date, parse_date};
use cycle_tracker::storage::EncryptedFileVault;
use cycle_tracker::tracker::{RemoveOutcome, SettingsUpdate};
use cycle_tracker::Tracker;

#[derive(Parser)]
#[command(name = "cycle-tracker", version, about = "Private cycle tracker")]
struct Cli {
    /// Encrypted data file (defaults to the local data directory)
    #[arg(long, env = "CYCLE_TRACKER_DATA", global = true)]
    data: Option<PathBuf>,

    #[arg(long, env = "CYCLE_TRACKER_PASSPHRASE", hide_env_values = true, global = true)]
    passphrase: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new encrypted dataset
    Init,
    #[command(flatten)]
    Dataset(DatasetCommand),
}

/// Commands that need an unlocked dataset.
#[derive(Subcommand)]
enum DatasetCommand {
    /// Mark the first day of a period
    Start { date: String },
    /// Confirm the last day of a period
    End { date: String },
    /// Remove the start or end mark on a day
    Unmark { date: String },
    /// Change a cycle's dates
    Edit {
        id: Uuid,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete a cycle
    Delete { id: Uuid },
    /// Current cycle day, phase and key dates
    Status {
        /// Evaluate as of this date instead of today
        #[arg(long)]
        today: Option<String>,
    },
    /// Day classification for one month
    Calendar { year: i32, month: u32 },
    /// Day classification for every known day
    Map,
    /// Cycle day number of a date
    Day { date: String },
    /// Past cycles, newest first
    History,
    /// Plain-text statistics summary
    Stats,
    /// Show or change default cycle settings
    Settings {
        #[arg(long)]
        cycle_length: Option<i64>,
        #[arg(long)]
        period_length: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        ovulation_offset: Option<i64>,
    },
    /// Write a JSON backup
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace all data with a JSON backup
    Import { path: PathBuf },
    /// Permanently delete all data
    Wipe {
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print<T: Serialize + std::fmt::Debug>(json: bool, value: &T) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value:#?}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let vault = match cli.data {
        Some(path) => EncryptedFileVault::new(path),
        None => EncryptedFileVault::default_location()?,
    };
    let tracker = Tracker::new(vault);
    let passphrase = cli
        .passphrase
        .ok_or("passphrase required (--passphrase or CYCLE_TRACKER_PASSPHRASE)")?;

    match cli.command {
        Commands::Init => init(&tracker, &passphrase),
        Commands::Dataset(command) => {
            if !tracker.unlock(&passphrase)? {
                return Err("wrong passphrase".into());
            }
            let result = execute(&tracker, command, cli.json);
            tracker.lock();
            result
        }
    }
}

fn init(
    tracker: &Tracker<EncryptedFileVault>,
    passphrase: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if tracker.is_setup()? {
        return Err("data already exists; wipe it first".into());
    }
    tracker.setup(passphrase)?;
    tracker.lock();
    println!("created");
    Ok(())
}

fn execute(
    tracker: &Tracker<EncryptedFileVault>,
    command: DatasetCommand,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let today = chrono::Local::now().date_naive();

    match command {
        DatasetCommand::Start { date } => {
            let cycle = tracker.start_period(&date)?;
            println!("cycle started: {} ({})", format_date(cycle.start_date), cycle.id);
        }
        DatasetCommand::End { date } => {
            let cycle = tracker.confirm_end(&date)?;
            println!("period {} confirmed through {date}", format_date(cycle.start_date));
        }
        DatasetCommand::Unmark { date } => match tracker.remove_mark(&date)? {
            RemoveOutcome::CycleDeleted(id) => println!("cycle deleted: {id}"),
            RemoveOutcome::EndCleared(id) => println!("end cleared: {id}"),
            RemoveOutcome::EndEstimated(id) => println!("end replaced by estimate: {id}"),
            RemoveOutcome::Unchanged => println!("nothing to remove on {date}"),
        },
        DatasetCommand::Edit { id, start, end } => {
            let cycle = tracker.edit_cycle(id, &start, end.as_deref())?;
            print(as_json, &cycle)?;
        }
        DatasetCommand::Delete { id } => {
            tracker.delete_cycle(id)?;
            println!("cycle deleted: {id}");
        }
        DatasetCommand::Status { today: at } => {
            let at = at.as_deref().map(parse_date).transpose()?.unwrap_or(today);
            match tracker.status(at)? {
                Some(status) if as_json => print(true, &status)?,
                Some(status) => {
                    match (status.cycle_day, status.phase) {
                        (Some(day), Some(phase)) => println!("Day {day}: {phase}"),
                        _ => println!("No active cycle"),
                    }
                    if let Some(end) = status.period_end {
                        println!("Period ends: {}", format_date(end));
                    }
                    println!("Ovulation: {}", format_date(status.ovulation_date));
                    println!(
                        "Next cycle: {} (in {} days)",
                        format_date(status.next_cycle_date),
                        status.days_until_next
                    );
                    println!("Progress: {}%", status.progress_percent);
                }
                None => println!("No cycles recorded"),
            }
        }
        DatasetCommand::Calendar { year, month } => {
            let month = tracker.month(year, month)?;
            if as_json {
                print(true, &month)?;
            } else {
                for (day, state) in &month.days {
                    println!("{}  {}", format_date(*day), state.kind.as_str());
                }
            }
        }
        DatasetCommand::Map => {
            let map = tracker.date_map()?;
            if as_json {
                print(true, &map)?;
            } else {
                for (day, state) in &map {
                    println!("{}  {}", format_date(*day), state.kind.as_str());
                }
            }
        }
        DatasetCommand::Day { date } => match tracker.cycle_day(&date)? {
            Some(day) => println!("{day}"),
            None => println!("no active cycle on {date}"),
        },
        DatasetCommand::History => {
            let rows = tracker.history()?;
            if as_json {
                print(true, &rows)?;
            } else {
                for row in rows {
                    let end = row.end_date.map(format_date).unwrap_or_else(|| "...".into());
                    let mut line = format!("{} -> {}", format_date(row.start_date), end);
                    if let Some(len) = row.cycle_length {
                        line.push_str(&format!("  cycle {len}d"));
                    }
                    if let Some(len) = row.period_length {
                        line.push_str(&format!("  period {len}d"));
                    }
                    println!("{line}  [{}]", row.id);
                }
            }
        }
        DatasetCommand::Stats => print!("{}", tracker.stats_report()?),
        DatasetCommand::Settings {
            cycle_length,
            period_length,
            ovulation_offset,
        } => {
            let update = SettingsUpdate {
                cycle_length,
                period_length,
                ovulation_offset,
            };
            let defaults = if update == SettingsUpdate::default() {
                tracker.settings()?
            } else {
                tracker.update_settings(update)?
            };
            print(as_json, &defaults)?;
        }
        DatasetCommand::Export { output } => {
            let json = tracker.export_data()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        DatasetCommand::Import { path } => {
            let json = fs::read_to_string(&path)?;
            let count = tracker.import_data(&json)?;
            println!("imported {count} cycles");
        }
        DatasetCommand::Wipe { yes } => {
            if !yes {
                return Err("refusing to wipe without --yes".into());
            }
            tracker.wipe_all_data()?;
            println!("all data deleted");
        }
    }
    Ok(())
}
