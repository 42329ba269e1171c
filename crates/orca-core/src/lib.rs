// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orca Core - Algorithm Execution Control Plane
//!
//! This crate provides the control plane for distributed algorithm execution.
//! Processors register the algorithms they host; emitting a window of data
//! triggers a layered execution plan over every algorithm rooted at the
//! window's type, dispatched to the owning processors over streaming gRPC
//! with all results persisted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Data Producers                                  │
//! │                  (emit windows of telemetry data)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ EmitWindow
//!                                    ▼
//! ┌───────────────────────┐  RegisterProcessor  ┌───────────────────────────┐
//! │      orca-core        │◄────────────────────│        Processors         │
//! │   (This Crate)        │                     │  (host the algorithms)    │
//! │  Registration, Plans, │────────────────────►│                           │
//! │  Stage Execution      │  HealthCheck +      └───────────────────────────┘
//! └───────────────────────┘  ExecuteDagPart (stream)
//!           │
//!           ▼
//! ┌───────────────────────┐
//! │      PostgreSQL       │
//! │   (Durable Storage)   │
//! └───────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `RegisterProcessor` | Upsert a processor, its window types, metadata fields, algorithms and dependencies in one transaction |
//! | `EmitWindow` | Insert a window, build the layered execution plan, launch the executor in the background |
//! | `Expose` | Read back the registered state as processors with their supported-algorithm trees |
//!
//! # Execution Model
//!
//! The dependency edges stored at registration form a DAG (cycles are
//! rejected when the edge is declared). Emitting a window reads every
//! maximal dependency chain rooted at the window's type as parallel
//! dot-joined id strings and rebuilds the DAG in memory:
//!
//! 1. Nodes are grouped into stages by topological layer; nodes of one
//!    stage have no dependencies on each other.
//! 2. Each stage's nodes are grouped by owning processor into tasks.
//! 3. Stages run strictly in order; each task is one `ExecuteDagPart`
//!    streaming call carrying the upstream results (and any requested
//!    lookback history) for every node.
//!
//! The executor runs on a background task decoupled from the EmitWindow
//! caller, so the RPC answers as soon as the window row commits.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ORCA_CONNECTION_STRING` | Yes | - | PostgreSQL connection string |
//! | `ORCA_PORT` | No | `4040` | gRPC listen port |
//! | `ORCA_LOG_LEVEL` | No | `INFO` | Log level |
//! | `ORCA_ENV` | No | - | `production`/`prod` enables TLS toward processors |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error types with gRPC status mapping
//! - [`store`]: PostgreSQL records and queries for the eight core tables
//! - [`registry`]: Transactional processor registration with cycle detection
//! - [`plan`]: Layered execution plan construction
//! - [`executor`]: Stage execution against remote processors
//! - [`handlers`]: Core operation handlers
//! - [`server`]: gRPC facade and message validation

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for core operations with gRPC status mapping.
pub mod error;

/// Store records and PostgreSQL queries.
pub mod store;

/// Transactional processor registration with cycle detection.
pub mod registry;

/// Layered execution plan construction from dependency path strings.
pub mod plan;

/// Stage execution against remote processors.
pub mod executor;

/// Core operation handlers (registration, window emission, expose).
pub mod handlers;

/// gRPC facade and message validation.
pub mod server;
