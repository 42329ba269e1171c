// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orca Protocol - gRPC + Protobuf communication layer
//!
//! This crate provides the wire contract for communication between:
//! - External clients and orca-core (registration, window emission, expose)
//! - orca-core and processors (health checks, DAG part execution)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      orca-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Unary + Server Streaming (tonic)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: HTTP/2, TLS in production deployments           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Services
//!
//! ## OrcaCore
//!
//! Served by orca-core, consumed by processors and data producers:
//! - `RegisterProcessor`: register a processor with its algorithms
//! - `EmitWindow`: emit a window of data, triggering algorithm execution
//! - `Expose`: read back the registered internal state
//!
//! ## OrcaProcessor
//!
//! Served by every processor, consumed by orca-core:
//! - `HealthCheck`: liveness and serving status
//! - `ExecuteDagPart`: execute a set of algorithms for a window, streaming
//!   results back as they complete
//!
//! # Usage
//!
//! ```ignore
//! use orca_protocol::proto::orca_processor_client::OrcaProcessorClient;
//! use orca_protocol::{channel, proto};
//!
//! let chan = channel::connect("processor.internal:50051", true).await?;
//! let mut client = OrcaProcessorClient::new(chan);
//!
//! let response = client
//!     .health_check(proto::HealthCheckRequest { timestamp: 0 })
//!     .await?;
//! ```

pub mod channel;
pub mod convert;

// Generated protobuf types and service stubs for the `orca` package.
pub mod proto {
    #![allow(clippy::large_enum_variant)]
    include!(concat!(env!("OUT_DIR"), "/orca.rs"));
}

// Re-export main helpers
pub use channel::{connect, ChannelError};
pub use convert::{datetime_from_timestamp, json_to_struct, struct_to_json, timestamp_from_datetime};
