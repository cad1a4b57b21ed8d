// ABOUTME: CLI entry point for dba
// ABOUTME: Parses commands, builds the database session and routes to handlers

use clap::{Parser, Subcommand};
use webapp_dba::commands;
use webapp_dba::config::DbaConfig;
use webapp_dba::serializer::Format;
use webapp_dba::session::Session;

#[derive(Parser)]
#[command(name = "dba")]
#[command(about = "Backup, restore, export and load the web application database", long_about = None)]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,
    /// Schema holding the application tables
    #[arg(long, global = true)]
    search_path: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the current schema into a backup schema
    Backup {
        /// List the available backup schemas
        #[arg(long)]
        list: bool,
        /// Backup name, appended to the schema name
        #[arg(long)]
        name: Option<String>,
        /// Backup schema name
        #[arg(long)]
        schema: Option<String>,
    },
    /// Replace the current schema with a backup schema
    Restore {
        /// List the available backup schemas
        #[arg(long)]
        list: bool,
        /// Backup name, appended to the schema name
        #[arg(long)]
        name: Option<String>,
        /// Backup schema name
        #[arg(long)]
        schema: Option<String>,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Export the records of the current schema
    Export {
        #[arg(long, value_enum, ignore_case = true, default_value_t = Format::Yaml)]
        fmt: Format,
        /// Export only this table
        #[arg(long)]
        table: Option<String>,
        filename: String,
    },
    /// Import records into the current schema
    #[command(alias = "import")]
    Inport {
        #[arg(long, value_enum, ignore_case = true, default_value_t = Format::Yaml)]
        fmt: Format,
        /// Import only this table
        #[arg(long)]
        table: Option<String>,
        filename: String,
    },
    /// Load a data document, resolving references between tables
    Loader {
        #[arg(long, value_enum, ignore_case = true, default_value_t = Format::Yaml)]
        fmt: Format,
        filename: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DbaConfig::from_file(path)?,
        None => DbaConfig::default(),
    }
    .with_overrides(cli.database_url, cli.search_path);

    let mut session = Session::open(&config).await?;

    match cli.command {
        Commands::Backup { list, name, schema } => {
            commands::backup(&mut session, list, name.as_deref(), schema.as_deref()).await
        }
        Commands::Restore {
            list,
            name,
            schema,
            yes,
        } => {
            commands::restore(&mut session, list, name.as_deref(), schema.as_deref(), yes).await
        }
        Commands::Export {
            fmt,
            table,
            filename,
        } => commands::export(&session, fmt, &filename, table.as_deref()).await,
        Commands::Inport {
            fmt,
            table,
            filename,
        } => commands::inport(&mut session, fmt, &filename, table.as_deref()).await,
        Commands::Loader { fmt, filename } => {
            commands::loader(&mut session, fmt, &filename).await
        }
    }
}
