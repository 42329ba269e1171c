// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orca Core - Algorithm Execution Control Plane
//!
//! Core is responsible for:
//! - Processor registration (algorithms, window types, dependencies)
//! - Execution planning when windows are emitted
//! - Dispatching plan stages to processors and persisting results

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use orca_core::config::Config;
use orca_core::handlers::HandlerState;
use orca_core::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?;

    // Initialize tracing at the configured level
    let filter = tracing_subscriber::EnvFilter::try_new(config.log_level.to_lowercase())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Orca Core");
    info!(
        listen_addr = %config.listen_addr,
        production = config.is_production,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.connection_string)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    let config = Arc::new(config);
    let state = Arc::new(HandlerState::new(pool.clone(), config.clone()));

    info!("Orca Core initialized successfully");

    // Start the gRPC server (processors and data producers connect here)
    let listen_addr = config.listen_addr;
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(listen_addr, server_state).await {
            error!("gRPC server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
