use anyhow::{Context, Result};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use live_updates::{LiveUpdates, RouterRenderer};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod handlers;
mod live;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;
mod views;

use crate::config::{CourseroomConfig, FileConfig, ServerConfig};
use crate::db::Database;
use crate::live::CourseScope;
use crate::repository::CourseRepository;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "courseroom")]
#[command(about = "Course conversations with live-updating pages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.courseroom)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web server in the foreground
    Serve(ServeArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Port for the web server (overrides config.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<CourseRepository>,
    pub live_updates: LiveUpdates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CourseroomConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServeArgs::default(), config).await,
        Some(Commands::Serve(args)) => run_server(args, config).await,
        Some(Commands::Config) => print_config(&config),
    }
}

fn print_config(config: &CourseroomConfig) -> Result<()> {
    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid {}", config.config_toml_path().display()))?;
    print!("{}", toml::to_string_pretty(&file_config)?);
    Ok(())
}

/// Page routes take part in live updates; probes and metrics do not. Abort
/// beacons are honoured on every path.
pub(crate) fn app(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(handlers::index))
        .route("/courses", post(handlers::create_course))
        .route("/courses/{id}", get(handlers::course_page))
        .route("/courses/{id}/messages", post(handlers::post_message))
        .route_layer(from_fn_with_state(
            state.live_updates.clone(),
            live_updates::middleware,
        ));

    Router::new()
        .merge(pages)
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(from_fn_with_state(
            state.live_updates.clone(),
            live_updates::abort_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, config: CourseroomConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "courseroom=debug,live_updates=debug,tower_http=debug,info"
    } else {
        "courseroom=info,live_updates=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Courseroom");

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid {}", config.config_toml_path().display()))?;
    let server_config = ServerConfig::resolve(&file_config.server, args.host, args.port);
    let live_config = config::live_updates_config(&file_config.live_updates);

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all courses and messages!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(CourseRepository::new(db.pool.clone()));

    // The renderer replays pushes through the finished router, installed below.
    let renderer = RouterRenderer::new(live_config.max_render_bytes);
    let live_updates = LiveUpdates::new(
        db.pool.clone(),
        live_config,
        Arc::new(renderer.clone()),
        Arc::new(CourseScope),
    )
    .await
    .context("Failed to start live updates")?;

    let app_state = AppState {
        db,
        repository,
        live_updates: live_updates.clone(),
    };

    let router = app(app_state);
    renderer.install(router.clone());

    let listener = tokio::net::TcpListener::bind(server_config.addr())
        .await
        .with_context(|| format!("Failed to bind {}", server_config.addr()))?;
    let actual_addr = listener.local_addr()?;

    info!("Courseroom listening on http://{}", actual_addr);
    info!("");
    info!("Endpoints:");
    info!("  GET    /                        - Course list");
    info!("  POST   /courses                 - Create course");
    info!("  GET    /courses/{{id}}            - Course conversation");
    info!("  POST   /courses/{{id}}/messages   - Post message");
    info!("  GET    /health, /metrics        - Probes and counters");

    // Held-open channels would keep graceful shutdown waiting, so end them
    // as soon as the signal arrives.
    let live_for_shutdown = live_updates.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing live channels...");
        live_for_shutdown.shutdown();
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    let counts = live_updates.store().counts().await;
    match counts {
        Ok(c) => info!(
            "Registry at shutdown: {} provisional, {} connected",
            c.provisional, c.connected
        ),
        Err(e) => warn!("Failed to read registry at shutdown: {}", e),
    }

    info!("Shutdown complete");
    server_result
}
