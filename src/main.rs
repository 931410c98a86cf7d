//! Command-line front end for the query runner.
//!
//! ```bash
//! sqlrunner --env prod run "SELECT now(); SELECT 1"
//! sqlrunner --env test tables
//! sqlrunner config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::error;
use serde::Serialize;

use sqlrunner::config::EnvFileSettings;
use sqlrunner::db::history::DEFAULT_HISTORY_FILE;
use sqlrunner::{
    clean_submitted_query, ConfigResolver, Environment, PgConnector, QueryExecutor, QueryHistory,
};

#[derive(Parser, Debug)]
#[command(name = "sqlrunner", version, about = "Run ad-hoc SQL against a configured environment")]
struct Args {
    /// Environment (dev, prod, test, custom); anything else means dev
    #[arg(short, long, default_value = "dev", env = "SQLRUNNER_ENV")]
    env: String,

    /// Directory holding .env.<environment> and db_config.json
    #[arg(short = 'C', long, default_value = ".")]
    config_dir: PathBuf,

    /// Query history file
    #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
    history: PathBuf,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one or more ;-separated statements
    Run {
        query: Option<String>,
        /// Read the query from a file instead
        #[arg(short, long, value_name = "FILE", conflicts_with = "query")]
        file: Option<PathBuf>,
    },
    /// List user tables (schema.table)
    Tables {
        /// Print the catalog rows instead of schema.table names
        #[arg(long)]
        rows: bool,
    },
    /// List triggers
    Triggers,
    /// Show the redacted configuration, or write/delete the env file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Show saved query history
    History,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write .env.<environment>
    Set {
        #[arg(long, default_value = "")]
        host: String,
        #[arg(long, default_value = "")]
        port: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        user: String,
        /// Password to store; DB_PASSWORD itself is never copied in
        #[arg(
            long,
            default_value = "",
            env = "SQLRUNNER_SET_PASSWORD",
            hide_env_values = true
        )]
        password: String,
        #[arg(long, default_value = "")]
        schema: String,
    },
    /// Delete .env.<environment>
    Delete,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

async fn run(args: Args) -> Result<(), String> {
    let env = Environment::normalize(&args.env);
    let executor = QueryExecutor::new(
        Arc::new(ConfigResolver::from_dir(&args.config_dir)),
        PgConnector::with_timeout(Duration::from_secs(args.timeout)),
    );
    let resolver = executor.resolver();
    let history = QueryHistory::new(&args.history);

    match args.command {
        Command::Run { query, file } => {
            let raw = match (query, file) {
                (Some(query), _) => query,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read {}: {}", path.display(), e))?,
                (None, None) => sqlrunner::DEFAULT_QUERY.to_string(),
            };
            let cleaned = clean_submitted_query(&raw);
            if let Err(e) = history.save(&cleaned) {
                error!("Could not save query history: {}", e);
            }
            let result = executor.execute_in(&cleaned, env).await;
            print_json(&result)?;
            if result.is_error() {
                return Err("query failed".to_string());
            }
        }
        Command::Tables { rows: false } => {
            print_json(&executor.list_table_fullnames(env.as_str()).await)?
        }
        Command::Tables { rows: true } => print_json(&executor.default_tables(env.as_str()).await)?,
        Command::Triggers => print_json(&executor.list_triggers(env.as_str()).await)?,
        Command::Config { action: None } => print_json(&resolver.display_config(env))?,
        Command::Config {
            action:
                Some(ConfigAction::Set {
                    host,
                    port,
                    name,
                    user,
                    password,
                    schema,
                }),
        } => {
            let settings = EnvFileSettings {
                host,
                port,
                name,
                user,
                password,
                schema,
            };
            let path = resolver
                .save_env_file(env, &settings)
                .map_err(|e| e.to_string())?;
            println!("Configuration '{}' saved.", path.display());
        }
        Command::Config {
            action: Some(ConfigAction::Delete),
        } => {
            if resolver.delete_env_file(env).map_err(|e| e.to_string())? {
                println!("Configuration for '{}' deleted.", env);
            } else {
                println!("No configuration file to delete.");
            }
        }
        Command::History => print_json(&history.load().map_err(|e| e.to_string())?)?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
