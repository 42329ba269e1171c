// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC channel helpers for dialing processors.

use thiserror::Error;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

/// Errors that can occur while establishing a processor channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid processor address '{address}': {details}")]
    InvalidAddress { address: String, details: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Open a channel to a processor at `connection_string` (a `host:port` pair).
///
/// In production the channel is TLS-protected and the certificate is verified
/// against the host portion of the connection string. Outside production a
/// plaintext channel is used.
pub async fn connect(connection_string: &str, production: bool) -> Result<Channel, ChannelError> {
    let endpoint = if production {
        let server_name = host_portion(connection_string);
        debug!(address = connection_string, server_name, "dialing processor over TLS");
        let tls = ClientTlsConfig::new()
            .with_native_roots()
            .domain_name(server_name);
        endpoint_for(&format!("https://{connection_string}"), connection_string)?.tls_config(tls)?
    } else {
        debug!(address = connection_string, "dialing processor over plaintext");
        endpoint_for(&format!("http://{connection_string}"), connection_string)?
    };

    Ok(endpoint.connect().await?)
}

fn endpoint_for(uri: &str, address: &str) -> Result<Endpoint, ChannelError> {
    Endpoint::from_shared(uri.to_string()).map_err(|e| ChannelError::InvalidAddress {
        address: address.to_string(),
        details: e.to_string(),
    })
}

/// Host portion of a `host:port` connection string. Falls back to the full
/// string when no port separator is present.
pub fn host_portion(connection_string: &str) -> &str {
    match connection_string.rsplit_once(':') {
        Some((host, _port)) => host,
        None => connection_string,
    }
}
