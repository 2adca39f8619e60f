mod classify;
mod collect;
mod dates;
mod digest;
mod record;
mod run;
mod settings;
mod store;
mod upload;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::dates::DateResolver;
use crate::run::RunContext;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "taxdigest", about = "Daily Indian tax-law digest: collect, back up, upload")]
struct Cli {
    /// Settings file (default: ./taxdigest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the target window, write the JSON backup, upload every bucket
    Run {
        /// Wipe each sheet and rewrite it from row 1
        #[arg(long)]
        clear: bool,
        /// Upload into an in-memory store and skip digest delivery
        #[arg(long)]
        dry_run: bool,
        /// Read JSON exports from this directory instead of scraping
        #[arg(long)]
        from_exports: Option<PathBuf>,
        /// Pretend today is this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the dates a run would collect
    Targets {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the canonical form of scraped date strings
    Normalize {
        #[arg(required = true)]
        dates: Vec<String>,
    },
    /// Upload a JSON backup from an earlier run
    Upload {
        #[arg(long)]
        from: PathBuf,
        #[arg(long)]
        clear: bool,
    },
    /// Show the next writable row of a sheet
    Cursor { sheet: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.as_str().into()),
        )
        .init();

    let t0 = Instant::now();
    let utc_offset = settings.utc_offset_minutes;
    let resolver = move |date: Option<NaiveDate>| match date {
        Some(d) => DateResolver::new(d),
        None => DateResolver::from_clock(utc_offset),
    };

    let exit_code = match cli.command {
        Commands::Run {
            clear,
            dry_run,
            from_exports,
            date,
        } => {
            let resolver = resolver(date);
            if dry_run {
                settings = settings.into_dry_run();
            }
            settings.validate()?;

            let store = match run::open_store(&settings) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!("Store unavailable, uploads will fail: {}", e);
                    None
                }
            };
            let exports = from_exports.or_else(|| settings.input_dir.clone());
            let collectors = run::build_collectors(&settings, exports.as_deref());
            let sinks = if dry_run {
                Vec::new()
            } else {
                run::build_sinks(&settings)
            };

            let report = run::run_daily(RunContext {
                settings: &settings,
                resolver,
                collectors,
                store: store.as_deref(),
                sinks,
                clear,
            })
            .await;
            report.print();
            report.exit_code
        }
        Commands::Targets { date } => {
            for line in run::describe_targets(&resolver(date)) {
                println!("{}", line);
            }
            run::EXIT_OK
        }
        Commands::Normalize { dates: inputs } => {
            for d in &inputs {
                println!("{:<28} -> {}", d, dates::normalize_for_compare(d));
            }
            run::EXIT_OK
        }
        Commands::Upload { from, clear } => {
            settings.validate()?;
            let store = run::open_store(&settings)?;
            let uploads = run::upload_backup(Some(&*store), &settings, &from, clear).await?;
            if uploads.is_empty() {
                println!("Backup {} holds no records.", from.display());
            }
            for u in &uploads {
                println!(
                    "{:<26} {:<6} {} rows",
                    u.sheet,
                    if u.result.success { "ok" } else { "FAILED" },
                    u.result.rows_written
                );
            }
            run::upload_exit_code(&uploads)
        }
        Commands::Cursor { sheet } => {
            settings.validate()?;
            let store = run::open_store(&settings)?;
            let row = upload::next_available_row(&*store, &sheet).await?;
            println!("{}: next row {}", sheet, row);
            run::EXIT_OK
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    if exit_code != run::EXIT_OK {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
