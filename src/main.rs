use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedport::config::Config;
use feedport::feed::FeedRecord;
use feedport::storage::{Database, DatabaseError};
use feedport::{OpmlPorter, PortError};

/// Get the config directory path (~/.config/feedport/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedport");
    Ok(config_dir)
}

/// The config directory, created if needed and restricted to the current user.
fn default_dir() -> Result<PathBuf> {
    let config_dir = get_config_dir()?;
    prepare_config_dir(&config_dir)?;
    Ok(config_dir)
}

fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: user-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Could not restrict config directory to its owner"
            );
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedport", about = "Import and export feed subscriptions as OPML")]
struct Args {
    /// Config file (default: ~/.config/feedport/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed database (overrides database_path from the config file)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add the feeds of an OPML file to the database
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write every stored feed to an OPML file
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the stored feeds, grouped
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => default_dir()?.join("feeds.db"),
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The feed database is locked by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let porter = OpmlPorter::new(Arc::new(db), config.opml);

    match args.command {
        Command::Import { file } => match porter.spawn_import_file(file).await {
            Ok(report) => println!("Imported {} feeds", report.imported),
            Err(PortError::EmptyResult) => {
                eprintln!("Cannot find any feeds to import");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Error during feed import: {}", e);
                std::process::exit(1);
            }
        },
        Command::Export { file } => match porter.spawn_export_file(file).await {
            Ok(report) => println!("Exported to {}", report.destination),
            Err(e) => {
                tracing::debug!(error = %e, "Export failed");
                eprintln!("Error during feed export");
                std::process::exit(1);
            }
        },
        Command::List => {
            let records = porter
                .store()
                .get_feeds()
                .await
                .context("Failed to load feeds")?;
            print_feeds(&records);
        }
    }

    Ok(())
}

fn print_feeds(records: &[FeedRecord]) {
    if records.is_empty() {
        println!("No feeds stored");
        return;
    }

    for record in records.iter().filter(|r| r.is_top_level()) {
        if record.is_group {
            println!("{}/", record.title);
            for member in records.iter().filter(|r| r.group_id == Some(record.id)) {
                println!("  {}  {}", member.title, member.link);
            }
        } else {
            println!("{}  {}", record.title, record.link);
        }
    }
}
