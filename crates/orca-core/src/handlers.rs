// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core operation handlers.
//!
//! These back the public gRPC surface: processor registration, window
//! emission (including plan construction and executor launch) and the expose
//! read path.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

use orca_protocol::{convert, proto};

use crate::config::Config;
use crate::error::CoreError;
use crate::store::postgres;
use crate::{executor, plan, registry};

/// Shared state for the core handlers.
pub struct HandlerState {
    /// Shared store connection pool.
    pub pool: PgPool,
    /// Loaded configuration; the executor reads the production flag.
    pub config: Arc<Config>,
}

impl HandlerState {
    /// Create a new handler state over the given pool and configuration.
    pub fn new(pool: PgPool, config: Arc<Config>) -> Self {
        Self { pool, config }
    }
}

/// Handle a processor registration request.
pub async fn handle_register_processor(
    state: &HandlerState,
    registration: &proto::ProcessorRegistration,
) -> Result<proto::RegistrationStatus, CoreError> {
    registry::register_processor(&state.pool, registration).await?;

    Ok(proto::RegistrationStatus {
        received: true,
        message: "Successfully registered processor".to_string(),
    })
}

/// Handle an emitted window.
///
/// Validates required metadata, inserts the window, builds the execution
/// plan from the stored dependency paths and commits. A non-empty plan is
/// handed to the executor as a background task after the commit, so the
/// reply never waits for processing.
#[instrument(skip_all, fields(
    window_type = %window.window_type_name,
    version = %window.window_type_version
))]
pub async fn handle_emit_window(
    state: &HandlerState,
    window: proto::Window,
) -> Result<proto::WindowEmitStatus, CoreError> {
    let metadata = window
        .metadata
        .as_ref()
        .map(convert::struct_to_json)
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

    let time_from = window
        .time_from
        .as_ref()
        .and_then(convert::datetime_from_timestamp)
        .ok_or_else(|| CoreError::Validation {
            field: "time_from".to_string(),
            message: "must be a valid timestamp".to_string(),
        })?;
    let time_to = window
        .time_to
        .as_ref()
        .and_then(convert::datetime_from_timestamp)
        .ok_or_else(|| CoreError::Validation {
            field: "time_to".to_string(),
            message: "must be a valid timestamp".to_string(),
        })?;

    let mut tx = state.pool.begin().await?;

    // Every metadata field declared for the window type must be supplied.
    let required_fields = postgres::read_metadata_fields_by_window_type(
        &mut *tx,
        &window.window_type_name,
        &window.window_type_version,
    )
    .await?;
    if !required_fields.is_empty() {
        let supplied = metadata.as_object().cloned().unwrap_or_default();
        for field in &required_fields {
            if !supplied.contains_key(&field.name) {
                return Err(CoreError::MetadataFieldMissing {
                    field_name: field.name.clone(),
                    window_type_name: window.window_type_name.clone(),
                    window_type_version: window.window_type_version.clone(),
                });
            }
        }
    }

    let inserted = postgres::register_window(
        &mut *tx,
        &window.window_type_name,
        &window.window_type_version,
        time_from,
        time_to,
        &window.origin,
        &metadata,
    )
    .await?;
    debug!(window_id = inserted.id, "window record inserted");

    let exec_paths =
        postgres::read_algorithm_execution_paths(&mut *tx, inserted.window_type_id).await?;

    let mut algo_paths = Vec::with_capacity(exec_paths.len());
    let mut window_type_paths = Vec::with_capacity(exec_paths.len());
    let mut proc_paths = Vec::with_capacity(exec_paths.len());
    let mut lookback_count_paths = Vec::with_capacity(exec_paths.len());
    let mut lookback_timedelta_paths = Vec::with_capacity(exec_paths.len());
    for path in exec_paths {
        algo_paths.push(path.algo_id_path);
        window_type_paths.push(path.window_type_id_path);
        proc_paths.push(path.proc_id_path);
        lookback_count_paths.push(path.lookback_count_path);
        lookback_timedelta_paths.push(path.lookback_timedelta_path);
    }

    let execution_plan = plan::build_plan(
        &algo_paths,
        &window_type_paths,
        &proc_paths,
        &lookback_count_paths,
        &lookback_timedelta_paths,
        inserted.window_type_id,
    )?;

    tx.commit().await?;

    if execution_plan.stages.is_empty() {
        return Ok(emit_status(
            proto::window_emit_status::Status::NoTriggeredAlgorithms,
            "No algorithms are registered for this window type",
        ));
    }

    let pool = state.pool.clone();
    let production = state.config.is_production;
    tokio::spawn(async move {
        if let Err(e) = executor::run(pool, production, execution_plan, window, inserted).await {
            error!(window_id = inserted.id, error = %e, "plan execution failed");
        }
    });

    Ok(emit_status(
        proto::window_emit_status::Status::ProcessingTriggered,
        "Processing triggered",
    ))
}

/// Handle an expose request: the full registered state as processors with
/// their supported-algorithm trees.
pub async fn handle_expose(
    state: &HandlerState,
    _settings: &proto::ExposeSettings,
) -> Result<proto::InternalState, CoreError> {
    let processors = postgres::read_processors(&state.pool).await?;
    let algorithms = postgres::read_algorithms(&state.pool).await?;
    let window_types = postgres::read_window_types(&state.pool).await?;
    let field_links = postgres::read_window_type_field_links(&state.pool).await?;

    let window_type_map: HashMap<i64, _> =
        window_types.iter().map(|wt| (wt.id, wt)).collect();
    let mut fields_by_window_type: HashMap<i64, Vec<proto::MetadataField>> = HashMap::new();
    for link in field_links {
        fields_by_window_type
            .entry(link.window_type_id)
            .or_default()
            .push(proto::MetadataField {
                name: link.name,
                description: link.description,
            });
    }

    let mut states = Vec::with_capacity(processors.len());
    for processor in &processors {
        let mut supported = Vec::new();
        for algorithm in algorithms.iter().filter(|a| a.processor_id == processor.id) {
            let window_type = window_type_map.get(&algorithm.window_type_id).ok_or_else(|| {
                CoreError::Database {
                    operation: "expose".to_string(),
                    details: format!(
                        "window type {} of algorithm '{}' not found",
                        algorithm.window_type_id, algorithm.name
                    ),
                }
            })?;

            supported.push(proto::Algorithm {
                name: algorithm.name.clone(),
                version: algorithm.version.clone(),
                description: algorithm.description.clone(),
                result_type: algorithm.result_type.to_proto() as i32,
                window_type: Some(proto::WindowType {
                    name: window_type.name.clone(),
                    version: window_type.version.clone(),
                    description: window_type.description.clone(),
                    metadata_fields: fields_by_window_type
                        .get(&window_type.id)
                        .cloned()
                        .unwrap_or_default(),
                }),
                dependencies: Vec::new(),
            });
        }

        states.push(proto::ProcessorState {
            name: processor.name.clone(),
            runtime: processor.runtime.clone(),
            connection_str: processor.connection_string.clone(),
            supported_algorithms: supported,
        });
    }

    info!(processors = states.len(), "exposing internal state");
    Ok(proto::InternalState { processors: states })
}

fn emit_status(status: proto::window_emit_status::Status, message: &str) -> proto::WindowEmitStatus {
    proto::WindowEmitStatus {
        status: status as i32,
        message: message.to_string(),
    }
}
