//! postboxd - the postbox server binary.

use clap::{Parser, Subcommand};
use postbox_core::AppConfig;
use postbox_server::{AppState, create_router, lifecycle};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit codes, part of the operational contract.
const EXIT_CONFIG: u8 = 1;
const EXIT_STORAGE: u8 = 2;
const EXIT_BIND: u8 = 3;

/// postbox - a federated ActivityPub instance
#[derive(Parser, Debug)]
#[command(name = "postboxd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (optional; the environment can provide
    /// everything)
    #[arg(
        short,
        long,
        env = "POSTBOX_CONFIG",
        default_value = "config/postbox.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (the default)
    Run,
    /// Create the instance's self service actor and exit
    Bootstrap,
    /// Manage local actors
    Actor {
        #[command(subcommand)]
        command: ActorCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ActorCommand {
    /// Create a local Person actor
    Add {
        /// Preferred username
        name: String,
        /// Password for client-to-server authentication
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AppConfig::load(Some(Path::new(&args.config))) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "{},tower_http=info",
                    config.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::info!("postbox v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Bootstrap => bootstrap(config).await,
        Command::Actor {
            command: ActorCommand::Add { name, password },
        } => actor_add(config, &name, password.as_deref()).await,
    }
}

async fn run(config: AppConfig) -> ExitCode {
    let state = match AppState::build(config.clone(), None).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "could not open storage");
            return ExitCode::from(EXIT_STORAGE);
        }
    };
    let router = create_router(state.clone());

    let listener = match lifecycle::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(listen = %config.listen, error = %e, "could not bind");
            return ExitCode::from(EXIT_BIND);
        }
    };

    match lifecycle::serve(listener, state, router).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn bootstrap(config: AppConfig) -> ExitCode {
    match AppState::build(config, None).await {
        Ok(state) => {
            let actor = state.self_actor();
            println!(
                "{}",
                actor
                    .id()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "<no id>".to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "bootstrap failed");
            ExitCode::from(EXIT_STORAGE)
        }
    }
}

async fn actor_add(config: AppConfig, name: &str, password: Option<&str>) -> ExitCode {
    let state = match AppState::build(config, None).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "could not open storage");
            return ExitCode::from(EXIT_STORAGE);
        }
    };
    match postbox_server::bootstrap::add_actor(&state.store, &state.base(), name, password).await {
        Ok(actor) => {
            println!(
                "{}",
                actor
                    .id()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "<no id>".to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, name = %name, "could not create actor");
            ExitCode::from(EXIT_STORAGE)
        }
    }
}
