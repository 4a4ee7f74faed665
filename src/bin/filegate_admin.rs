//! CLI entry point for filegate-admin: metadata inspection and reset tool.

use clap::{Parser, Subcommand};
use filegate::metadata::sqlite::SqliteMetadataStore;
use filegate::metadata::store::{MetadataStore, Table};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filegate-admin", about = "Filegate metadata inspection tool")]
struct Cli {
    /// Configuration file used to locate the SQLite database.
    #[arg(long, default_value = "filegate.example.yaml")]
    config: PathBuf,
    /// Explicit database path; overrides the config file.
    #[arg(long)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print all users as JSON (password hashes omitted)
    Users,
    /// Print all sessions as JSON
    Sessions,
    /// Print object metadata as JSON (object passwords omitted)
    Objects {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete every row of one table: users, sessions or objects
    Reset { table: String },
}

fn resolve_db_path(cli: &Cli) -> anyhow::Result<String> {
    if let Some(db) = &cli.db {
        return Ok(db.clone());
    }
    let config = filegate::config::load_config(&cli.config)?;
    Ok(config.metadata.sqlite.path)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db_path = resolve_db_path(&cli)?;
    if !std::path::Path::new(&db_path).exists() {
        anyhow::bail!("database not found: {db_path}");
    }
    let store = SqliteMetadataStore::new(&db_path)?;

    match cli.command {
        Commands::Users => print_json(&store.list_users().await?),
        Commands::Sessions => print_json(&store.list_sessions().await?),
        Commands::Objects { owner: Some(owner) } => {
            print_json(&store.list_objects_for(&owner).await?)
        }
        Commands::Objects { owner: None } => print_json(&store.list_objects().await?),
        Commands::Reset { table } => {
            let table = Table::parse(&table)
                .ok_or_else(|| anyhow::anyhow!("invalid table name: {table}"))?;
            store.reset(table).await?;
            eprintln!("Reset table {}", table.as_str());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
