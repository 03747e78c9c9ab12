use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use butterfly_timeline::{
    config::{Config, LogFormat},
    create_router,
    generation::GenerationClient,
    pipeline::Orchestrator,
    storage::SqliteStorage,
    timeline::TimelineRegistry,
    tree, AppState,
};

#[derive(Parser)]
#[command(name = "butterfly-timeline", version, about = "Alternate-history timeline simulator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run one pipeline to completion and print every stage
    Simulate {
        /// The divergence to simulate
        input: String,
        /// Timeline key to write into
        #[arg(long)]
        timeline: Option<String>,
    },
    /// Print the reconstructed tree of a timeline
    Tree {
        #[arg(long)]
        timeline: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Butterfly timeline starting..."
    );

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let generator = match GenerationClient::new(&config.generation, &config.request) {
        Ok(c) => {
            info!(base_url = %c.base_url(), model = %c.model(), "Generation client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize generation client");
            return Err(e.into());
        }
    };

    let timelines = TimelineRegistry::new(storage.clone());
    let orchestrator =
        Orchestrator::from_config(storage.clone(), timelines, Arc::new(generator), &config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, storage, orchestrator).await?,
        Command::Simulate { input, timeline } => {
            let report = orchestrator.run(&input, timeline.as_deref()).await?;
            println!("timeline {}", report.timeline_id);
            for output in &report.outputs {
                println!("\n[{}] {}", output.name, output.text);
            }
        }
        Command::Tree { timeline } => {
            let nodes = orchestrator.timelines().list(&timeline).await?;
            print!("{}", tree::render(&tree::build_forest(nodes)));
        }
    }

    Ok(())
}

async fn serve(
    config: &Config,
    storage: SqliteStorage,
    orchestrator: Orchestrator,
) -> anyhow::Result<()> {
    let resumed = orchestrator.resume_unfinished().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "Resumed interrupted runs");
    }

    let state = Arc::new(AppState::new(storage.clone(), orchestrator));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "Server ready");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    storage.close().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
