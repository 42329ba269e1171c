// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;

/// Orca Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection URL
    pub connection_string: String,
    /// gRPC listen address for the core services
    pub listen_addr: SocketAddr,
    /// Log level name (uppercased)
    pub log_level: String,
    /// Whether processor channels use TLS
    pub is_production: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `ORCA_CONNECTION_STRING`: store connection string
    ///
    /// Optional (with defaults):
    /// - `ORCA_PORT`: gRPC listen port (default: 4040)
    /// - `ORCA_LOG_LEVEL`: log level (default: INFO)
    /// - `ORCA_ENV`: `production`/`prod` enables TLS toward processors
    pub fn from_env() -> Result<Self, ConfigError> {
        let connection_string = std::env::var("ORCA_CONNECTION_STRING")
            .map_err(|_| ConfigError::Missing("ORCA_CONNECTION_STRING"))?;

        let port: u16 = std::env::var("ORCA_PORT")
            .unwrap_or_else(|_| "4040".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("ORCA_PORT", "must be a valid port number"))?;

        let log_level = std::env::var("ORCA_LOG_LEVEL")
            .map(|level| level.to_uppercase())
            .unwrap_or_else(|_| "INFO".to_string());

        let orca_env = std::env::var("ORCA_ENV").unwrap_or_default();
        let is_production = orca_env == "production" || orca_env == "prod";

        Ok(Self {
            connection_string,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            log_level,
            is_production,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
