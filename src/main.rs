use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use deepcheck::config::AppConfig;
use deepcheck::detection::provider_from_config;
use deepcheck::logging::{init_logging, LoggingConfig};
use deepcheck::server::{self, AppState};
use deepcheck::store::{AnalysisStore, IdentityProvider, InMemoryStore, QuotaState, SupabaseStore};
use deepcheck::Dispatcher;

#[derive(Parser, Debug)]
#[command(name = "deepcheck")]
#[command(version)]
#[command(about = "Deepfake analysis dispatcher")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress all log output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP analysis service
    Serve {
        /// Address to bind (overrides configuration)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides configuration)
        #[arg(long, short)]
        port: Option<u16>,

        /// Keep users, quotas and records in memory instead of the hosted store
        #[arg(long)]
        memory_store: bool,

        /// Bearer token accepted by the in-memory store
        #[arg(long, default_value = "local-dev-token")]
        memory_token: String,

        /// Provider-call quota of the in-memory user
        #[arg(long, default_value = "50")]
        memory_quota: u64,
    },
    /// Print the resolved configuration with secrets masked
    CheckConfig,
}

mod exit_codes {
    use std::process::ExitCode;

    /// Configuration could not be loaded or is incomplete
    pub fn config_error() -> ExitCode {
        ExitCode::from(78)
    }

    pub fn failure() -> ExitCode {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::config_error());
        }
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Commands::Serve {
            bind,
            port,
            memory_store,
            memory_token,
            memory_quota,
        } => {
            init_logging(LoggingConfig::from_flags(cli.verbose, cli.quiet));

            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let memory = memory_store.then(|| MemoryUser {
                token: memory_token,
                quota: memory_quota,
            });

            let dispatcher = match build_dispatcher(&config, memory) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start");
                    eprintln!("error: {}", e);
                    return Ok(exit_codes::config_error());
                }
            };

            if !dispatcher.has_provider() {
                tracing::warn!(
                    "No detection provider key configured; \
                     callers with quota left will get a configuration error"
                );
            }

            if let Err(e) = server::serve(&config.server, AppState::new(dispatcher)).await {
                tracing::error!(error = %e, "Server error");
                return Ok(exit_codes::failure());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Seed user for `--memory-store` runs.
struct MemoryUser {
    token: String,
    quota: u64,
}

fn build_dispatcher(
    config: &AppConfig,
    memory: Option<MemoryUser>,
) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    let (identities, store): (Arc<dyn IdentityProvider>, Arc<dyn AnalysisStore>) = match memory {
        Some(user) => {
            tracing::info!(quota = user.quota, "Using in-memory store");
            let store = Arc::new(InMemoryStore::new().with_user(
                user.token,
                "local-user",
                QuotaState::new(0, user.quota),
            ));
            (
                store.clone() as Arc<dyn IdentityProvider>,
                store as Arc<dyn AnalysisStore>,
            )
        }
        None => {
            let store = Arc::new(SupabaseStore::from_config(
                &config.store,
                config.provider.timeout(),
            )?);
            (
                store.clone() as Arc<dyn IdentityProvider>,
                store as Arc<dyn AnalysisStore>,
            )
        }
    };

    let provider = provider_from_config(&config.provider)?;
    Ok(Dispatcher::new(identities, store).with_optional_provider(provider))
}
