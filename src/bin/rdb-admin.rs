use clap::{Parser, Subcommand};
use log::error;
use rdb::{ConnectionConfig, Database, DbError, ExpirationConfig, RevisionsConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rdb-admin", version, about = "Administration CLI for the document store", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). Env and default locations are used otherwise.")]
    config: Option<PathBuf>,
    #[arg(long, help = "Server address; takes precedence over config/env")]
    address: Option<String>,
    #[arg(long, help = "Database name; takes precedence over config/env")]
    database: Option<String>,
    #[arg(long, help = "log4rs YAML config; RDB_LOG_* variables are used otherwise")]
    log_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(name = "ensure-db", about = "Create the database unless it exists")]
    EnsureDb,
    #[command(about = "Print whether the database exists")]
    Exists,
    #[command(about = "Configure document expiration")]
    Expiration {
        #[arg(long, default_value_t = 60, help = "Seconds between expiration sweeps")]
        frequency: u64,
        #[arg(long, help = "Disable expiration")]
        disable: bool,
    },
    #[command(about = "Configure revisions of a collection")]
    Revisions {
        #[arg(help = "Collection name")]
        collection: String,
        #[arg(long, help = "Minimum number of revisions to keep")]
        keep: Option<u64>,
        #[arg(long, help = "Minimum age of kept revisions, in seconds")]
        keep_secs: Option<u64>,
        #[arg(long, help = "Drop revisions when the document is deleted")]
        purge_on_delete: bool,
        #[arg(long, help = "Disable revisions")]
        disable: bool,
    },
    #[command(about = "Show the state of a server operation")]
    Operation {
        #[arg(help = "Operation id")]
        id: i64,
        #[arg(long, help = "Poll until the operation finishes")]
        wait: bool,
    },
}

fn load_config(cli: &Cli) -> Result<ConnectionConfig, DbError> {
    // Precedence: CLI > env > config files > defaults
    let mut cfg = ConnectionConfig::load(cli.config.as_deref())?;
    if let Some(address) = &cli.address {
        cfg.address.clone_from(address);
    }
    if let Some(database) = &cli.database {
        cfg.database.clone_from(database);
    }
    Ok(cfg)
}

async fn run(cli: Cli) -> Result<(), DbError> {
    let cfg = load_config(&cli)?;
    let db = Database::connect(&cfg).await?;
    match cli.command {
        Commands::EnsureDb => {
            db.ensure_exists().await?;
            println!("{} ready", db.name());
        }
        Commands::Exists => println!("{}", db.exists().await?),
        Commands::Expiration { frequency, disable } => {
            db.configure_expiration(&ExpirationConfig { disabled: disable, delete_frequency_secs: frequency })
                .await?;
        }
        Commands::Revisions { collection, keep, keep_secs, purge_on_delete, disable } => {
            let revisions = RevisionsConfig {
                minimum_revisions_to_keep: keep,
                minimum_revision_age_to_keep: keep_secs.map(Duration::from_secs),
                purge_on_delete,
                disabled: disable,
            };
            db.configure_revisions(&collection, &revisions).await?;
        }
        Commands::Operation { id, wait } => {
            let op = db.operation(id);
            if wait {
                println!("{}", op.wait().await?);
            } else {
                let state = op.status().await?;
                println!("{:?} {}", state.status, state.result.unwrap_or_default());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let logging = match &cli.log_config {
        Some(path) => rdb::logger::init_path(path),
        None => rdb::logger::configure_from_env(),
    };
    if let Err(e) = logging {
        eprintln!("logging disabled: {e}");
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
