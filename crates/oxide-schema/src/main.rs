//! oxide-schema CLI
//!
//! Command-line tool for inspecting and synchronizing database schemas.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_schema::prelude::*;

/// Declarative schema synchronization for SQL databases.
#[derive(Parser)]
#[command(name = "oxide-schema")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Prefix shared by every table name.
    #[arg(short, long, default_value = "")]
    prefix: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the reflected schema as JSON.
    Inspect {
        /// Table to inspect (all if not specified).
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Show the SQL a schema file would run, without executing it.
    Plan {
        /// Schema file (JSON).
        schema: PathBuf,

        /// Also drop columns, indexes and foreign keys the file does not declare.
        #[arg(long)]
        drop_undeclared: bool,
    },

    /// Bring the database in line with a schema file.
    Sync {
        /// Schema file (JSON).
        schema: PathBuf,

        /// Also drop columns, indexes and foreign keys the file does not declare.
        #[arg(long)]
        drop_undeclared: bool,
    },
}

fn drops(drop_undeclared: bool) -> DropUndeclared {
    if drop_undeclared {
        DropUndeclared::ALL
    } else {
        DropUndeclared::NONE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::sqlite(&cli.database)
        .await?
        .with_prefix(cli.prefix);

    match cli.command {
        Commands::Inspect { table } => {
            let tables = match table {
                Some(name) => {
                    let table = db.table(&name).await?;
                    if !table.exists() {
                        anyhow::bail!("Table '{name}' does not exist");
                    }
                    vec![table]
                }
                None => db.tables().await?,
            };
            let file = SchemaFile::from_states(tables.iter().map(Table::state));
            println!("{}", file.to_json()?);
        }

        Commands::Plan {
            schema,
            drop_undeclared,
        } => {
            let file = SchemaFile::from_path(&schema)?;
            let tables = file.tables(&db).await?;

            let mut empty = true;
            for table in &tables {
                let statements = table.plan(drops(drop_undeclared)).await?;
                if statements.is_empty() {
                    continue;
                }
                empty = false;
                println!("-- {}", table.name());
                for statement in statements {
                    println!("{statement};");
                }
                println!();
            }
            if empty {
                info!("Schema is up to date.");
            }
        }

        Commands::Sync {
            schema,
            drop_undeclared,
        } => {
            let file = SchemaFile::from_path(&schema)?;
            let mut tables = file.tables(&db).await?;
            db.synchronize_with(&mut tables, drops(drop_undeclared))
                .await?;
            info!("Synchronized {} table(s).", tables.len());
        }
    }

    Ok(())
}
