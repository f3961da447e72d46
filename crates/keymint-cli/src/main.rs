use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;

use commands::keys::ApiClient;
use commands::{migrate, parse_duration, CliError, OutputFormat};

const API_URL_ENV: &str = "KEYCTL_API_URL";

#[derive(Parser)]
#[command(name = "keyctl", about = "Key management service CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API endpoint URL (or set KEYCTL_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Request timeout (e.g. 500ms, 30s, 5m)
    #[arg(long, global = true, default_value = "30s", value_parser = parse_duration)]
    timeout: Duration,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new key for a tenant
    Create {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
    },

    /// Get a key for a tenant (current generation unless --generation is set)
    Get {
        /// Tenant ID
        #[arg(long)]
        tenant: String,

        /// Key generation
        #[arg(long)]
        generation: Option<u32>,
    },

    /// Rotate the key for a tenant
    Rotate {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
    },

    /// List all keys for a tenant
    List {
        /// Tenant ID
        #[arg(long)]
        tenant: String,
    },

    /// Disable a key generation for a tenant
    Disable {
        /// Tenant ID
        #[arg(long)]
        tenant: String,

        /// Key generation
        #[arg(long)]
        generation: u32,
    },

    /// Manage database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Show the status of all migrations
    Status,
}

fn api_url(cli_value: Option<String>) -> Result<String, CliError> {
    cli_value
        .or_else(|| std::env::var(API_URL_ENV).ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CliError::Usage(format!("--api-url is required (or set {API_URL_ENV})")))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Create { tenant } => {
            let api = ApiClient::new(api_url(cli.api_url)?, cli.timeout, cli.output)?;
            api.create(&tenant).await
        }
        Commands::Get { tenant, generation } => {
            let api = ApiClient::new(api_url(cli.api_url)?, cli.timeout, cli.output)?;
            api.get(&tenant, generation).await
        }
        Commands::Rotate { tenant } => {
            let api = ApiClient::new(api_url(cli.api_url)?, cli.timeout, cli.output)?;
            api.rotate(&tenant).await
        }
        Commands::List { tenant } => {
            let api = ApiClient::new(api_url(cli.api_url)?, cli.timeout, cli.output)?;
            api.list(&tenant).await
        }
        Commands::Disable { tenant, generation } => {
            let api = ApiClient::new(api_url(cli.api_url)?, cli.timeout, cli.output)?;
            api.disable(&tenant, generation).await
        }
        Commands::Migrate { action } => match action {
            MigrateAction::Up => migrate::up(cli.output).await,
            MigrateAction::Status => migrate::status(cli.output).await,
        },
        Commands::Version => {
            match cli.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }));
                }
                OutputFormat::Text => println!("keyctl version {}", env!("CARGO_PKG_VERSION")),
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_declaration_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn missing_api_url_is_a_usage_error() {
        std::env::remove_var(API_URL_ENV);
        let err = api_url(None).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        assert_eq!(
            api_url(Some("http://localhost:8080".into())).unwrap(),
            "http://localhost:8080"
        );
    }
}
