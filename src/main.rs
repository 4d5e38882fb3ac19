//! # ASR Gateway - Main Application Entry Point
//!
//! HTTP front end for an external speech-to-text decoder. Clients upload
//! audio; the gateway stores it in a transient cache, runs the decoder over
//! it and returns (single file) or records (batch) the transcription.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **cache**: Transient audio/manifest files, sweeping and diagnostics
//! - **transcription**: Engine seam, task registry, batch orchestration and
//!   the worker pool
//! - **state**: Shared state and request metrics
//! - **handlers** / **routes**: HTTP endpoints
//! - **middleware**: Request logging and metrics
//! - **error**: Error types and their HTTP responses
//!
//! ## Startup Sequence:
//! 1. Load `.env`, initialize tracing, load and validate configuration
//! 2. Create the cache areas and sweep anything left from a previous run
//! 3. Check that the model checkpoint exists (warning only)
//! 4. Start the worker pool and the periodic sweeper
//! 5. Bind the HTTP server and wait for SIGINT/SIGTERM

mod cache;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod routes;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::CommandEngine;

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting asr-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let engine = Arc::new(CommandEngine::new(config.engine.clone()));
    let app_state = AppState::new(config.clone(), engine);

    prepare_cache(&app_state, &config).await?;
    check_model_checkpoint(&config).await;

    let sweeper = config.cache.sweep_interval().map(|period| {
        info!(period_secs = period.as_secs(), "Periodic cache sweep enabled");
        cache::sweeper::spawn_periodic_sweep(
            app_state.cache.clone(),
            config.cache.max_age(),
            period,
        )
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Last wrap runs first: TracingLogger assigns the request id that
        // RequestLogging reads
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(routes::configure)
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handling failed, stopping server: {}", e),
            }
            server_handle.stop(true).await;
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    // Queued batches still run to completion before exit
    info!("Waiting for queued batches to finish");
    app_state.pool.shutdown().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing with a default filter chosen by `APP_ENV`.
///
/// `RUST_LOG` always wins when set.
fn init_tracing() -> Result<()> {
    let default_filter = match std::env::var("APP_ENV").as_deref() {
        Ok("development") => "asr_gateway=debug,actix_web=info",
        Ok("production") => "asr_gateway=warn,actix_web=warn",
        _ => "asr_gateway=info,actix_web=info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to initialize tracing")?;

    Ok(())
}

/// Create both cache areas and clear out files left by a previous run.
async fn prepare_cache(state: &AppState, config: &AppConfig) -> Result<()> {
    state.cache.ensure().await?;
    info!(root = %state.cache.root().display(), "Cache ready");

    match state.cache.sweep(config.cache.max_age()).await {
        Ok(report) => info!(
            files_removed = report.files_removed,
            failures = report.failures,
            "Startup cache sweep finished"
        ),
        Err(e) => warn!("Startup cache sweep failed: {}", e),
    }
    Ok(())
}

/// The decoder owns the checkpoint, so a missing one is only worth a warning:
/// it may be a model name the decoder resolves itself.
async fn check_model_checkpoint(config: &AppConfig) {
    let checkpoint = &config.engine.model_checkpoint;
    match tokio::fs::metadata(checkpoint).await {
        Ok(metadata) if metadata.is_dir() => {
            info!(checkpoint = %checkpoint.display(), "Model checkpoint found")
        }
        _ => warn!(
            checkpoint = %checkpoint.display(),
            "Model checkpoint directory not found; the decoder must resolve it"
        ),
    }
}

/// Resolve with the name of the first shutdown signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
