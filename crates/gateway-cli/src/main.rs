//! `memory-gateway` entry point: serves the MCP endpoint, drives the outbox
//! worker, and exposes a handful of operator commands. This file stays
//! thin — the HTTP surface lives in `gateway-server`, outbox draining lives
//! in `gateway-worker`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::Method;
use clap::{Parser, Subcommand};
use gateway_config::GatewayConfig;
use gateway_server::{routes, state::AppState};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "memory-gateway")]
#[command(about = "MCP gateway mediating governed writes/reads against OpenMemory")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (MCP endpoint, health, reliability report).
    Serve,

    /// Outbox worker commands.
    Worker {
        #[command(subcommand)]
        cmd: WorkerCmd,
    },

    /// Database commands.
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
}

#[derive(Subcommand)]
enum WorkerCmd {
    /// Claim and process one batch of due outbox rows, then exit.
    Run {
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Return dead-lettered rows to `pending` for a fresh retry cycle.
    ResetDead {
        #[arg(long)]
        target_space: Option<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Serve => run_serve().await,
        Commands::Worker { cmd } => run_worker(cmd).await,
        Commands::Db { cmd } => run_db(cmd).await,
    }
}

async fn run_serve() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    info!(config_hash = %config.config_hash(), "starting memory-gateway");

    let state = Arc::new(AppState::build(&config).await.context("building application state")?);

    let app = routes::build_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ).layer(cors_for_agents());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8787)));
    info!("memory-gateway listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

async fn run_worker(cmd: WorkerCmd) -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    let pool = gateway_db::connect(&config.database_url).await?;
    gateway_db::migrate(&pool).await?;

    match cmd {
        WorkerCmd::Run { once } => {
            let openmemory: Arc<dyn gateway_openmemory::MemoryBackend> =
                Arc::new(gateway_openmemory::OpenMemoryClient::new(
                    config.openmemory_base_url.clone(),
                    config.openmemory_api_key.clone(),
                    config.openmemory_timeout_seconds,
                    config.openmemory_max_client_retries,
                )?);
            let worker_config = gateway_worker::WorkerConfig::new_with_random_id(
                config.worker_batch_size,
                config.worker_max_retries,
                config.worker_base_backoff_seconds,
            );

            if once {
                let summary = gateway_worker::run_once(&pool, &openmemory, &worker_config).await?;
                println!(
                    "claimed={} sent={} retried={} dead={}",
                    summary.claimed, summary.sent, summary.retried, summary.dead
                );
                if summary.has_dead_letters() {
                    std::process::exit(1);
                }
            } else {
                let (_tx, rx) = tokio::sync::oneshot::channel();
                let summary = gateway_worker::run_forever(
                    &pool,
                    openmemory,
                    worker_config,
                    Duration::from_secs(5),
                    rx,
                )
                .await?;
                info!(claimed = summary.claimed, sent = summary.sent, dead = summary.dead, "worker loop exited");
            }
        }
        WorkerCmd::ResetDead { target_space } => {
            let reset = gateway_db::reset_dead_outbox_jobs(&pool, target_space.as_deref()).await?;
            println!("reset_rows={reset}");
        }
    }

    Ok(())
}

async fn run_db(cmd: DbCmd) -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    let pool = gateway_db::connect(&config.database_url).await?;

    match cmd {
        DbCmd::Status => {
            let status = gateway_db::status(&pool).await?;
            println!("db_ok={} has_write_audit_table={}", status.ok, status.has_write_audit_table);
        }
        DbCmd::Migrate => {
            gateway_db::migrate(&pool).await?;
            println!("migrations_applied=true");
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("GATEWAY_ADDR").ok()?.parse().ok()
}

/// CORS: agent runtimes call this endpoint from arbitrary local tooling, not
/// a browser origin, so headers/methods are permissive but origins are not
/// reflected wildcard-with-credentials.
fn cors_for_agents() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}
