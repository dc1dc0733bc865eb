//! `epoc` command-line tool: inspect and edit the shared configuration.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use epoc::config::{Settings, DEFAULT_CONFIG_FILE};
use epoc::{field, ConfigurationClient};

/// Shared configuration and run-state broker.
#[derive(Parser, Debug)]
#[command(name = "epoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file path.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database index, overriding the settings.
    #[arg(long, global = true)]
    db: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the operator summary.
    Show,
    /// Print one field, stored or derived.
    Get {
        /// Field name.
        field: String,
    },
    /// Assign a writable field.
    Set {
        /// Field name.
        field: String,
        /// Value, parsed according to the field type.
        value: String,
    },
    /// Apply a snapshot document.
    Load {
        /// Snapshot file.
        path: PathBuf,
        /// Clear the database before applying.
        #[arg(long)]
        flush: bool,
    },
    /// Export writable fields to a snapshot document.
    Save {
        /// Snapshot file.
        path: PathBuf,
    },
    /// Advance the dataset counter.
    Incr,
    /// Record the current dataset path and advance the counter.
    AfterWrite,
    /// List the registered fields.
    Fields,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("epoc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Fields = cli.command {
        for spec in field::fields() {
            let access = if spec.writable { "rw" } else { "ro" };
            println!(
                "{:<20} {:<9} {}  {}",
                spec.name,
                spec.kind.as_str(),
                access,
                spec.description
            );
        }
        return Ok(());
    }

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        settings.redis.db = db;
    }
    debug!(
        "Using {}:{} db {}",
        settings.redis.host, settings.redis.port, settings.redis.db
    );

    let mut cfg = ConfigurationClient::connect(&settings.redis)?;

    match cli.command {
        Commands::Show => print!("{}", cfg.summary()?),
        Commands::Get { field } => println!("{}", cfg.get(&field)?),
        Commands::Set { field, value } => cfg.set_text(&field, &value)?,
        Commands::Load { path, flush } => {
            let applied = cfg.load_snapshot(&path, flush)?;
            println!("Applied {applied} fields from {}", path.display());
        }
        Commands::Save { path } => {
            let snapshot = cfg.save_snapshot(&path)?;
            println!(
                "Saved {} fields to {}",
                snapshot.entries().len(),
                path.display()
            );
        }
        Commands::Incr => println!("{}", cfg.increment_file_id()?),
        Commands::AfterWrite => println!("{}", cfg.after_write()?.display()),
        Commands::Fields => {}
    }
    Ok(())
}
