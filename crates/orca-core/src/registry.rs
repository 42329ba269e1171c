// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Processor registration.
//!
//! Registers a processor together with its window types, metadata fields,
//! algorithms and algorithm dependencies inside a single transaction. Either
//! everything is persisted or nothing is.

use std::collections::BTreeSet;

use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

use orca_protocol::proto;

use crate::error::CoreError;
use crate::store::{self, postgres, NewAlgorithm, ResultType};

/// Register a processor and everything it supports.
///
/// Algorithms are created in a first pass and dependencies in a second, so a
/// processor may declare its algorithms in any order. A dependency that would
/// close a cycle in the stored graph rejects the whole registration with
/// [`CoreError::CircularDependency`]; re-registering a window type version
/// with a different metadata field set rejects it with
/// [`CoreError::WindowTypeMetadataChanged`].
#[instrument(skip_all, fields(processor = %registration.name, runtime = %registration.runtime))]
pub async fn register_processor(
    pool: &PgPool,
    registration: &proto::ProcessorRegistration,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    let project_name = if registration.project_name.is_empty() {
        None
    } else {
        Some(registration.project_name.as_str())
    };
    postgres::create_processor(
        &mut *tx,
        &registration.name,
        &registration.runtime,
        &registration.connection_str,
        project_name,
    )
    .await?;

    // First pass: window types, metadata fields and algorithm rows, so that
    // dependencies can reference any algorithm of this registration
    // regardless of declaration order.
    for algorithm in &registration.supported_algorithms {
        let window_type = algorithm
            .window_type
            .as_ref()
            .ok_or_else(|| CoreError::Validation {
                field: "window_type".to_string(),
                message: format!("algorithm '{}' declares no window type", algorithm.name),
            })?;

        let window_type_id = postgres::create_window_type(
            &mut *tx,
            &window_type.name,
            &window_type.version,
            &window_type.description,
        )
        .await?;

        let stored_fields = postgres::read_metadata_fields_by_window_type(
            &mut *tx,
            &window_type.name,
            &window_type.version,
        )
        .await?;

        if !stored_fields.is_empty() {
            check_metadata_fields(window_type, &stored_fields)?;
        } else {
            for field in &window_type.metadata_fields {
                let field_id =
                    postgres::create_metadata_field(&mut *tx, &field.name, &field.description)
                        .await?;
                postgres::link_window_type_metadata_field(&mut *tx, window_type_id, field_id)
                    .await?;
            }
        }

        let result_type = ResultType::from_proto(algorithm.result_type()).ok_or_else(|| {
            CoreError::Validation {
                field: "result_type".to_string(),
                message: format!(
                    "algorithm '{}' must declare a result type",
                    algorithm.name
                ),
            }
        })?;

        postgres::create_algorithm(
            &mut *tx,
            &NewAlgorithm {
                name: &algorithm.name,
                version: &algorithm.version,
                description: &algorithm.description,
                processor_name: &registration.name,
                processor_runtime: &registration.runtime,
                window_type_name: &window_type.name,
                window_type_version: &window_type.version,
                result_type,
            },
        )
        .await?;
        debug!(algorithm = %algorithm.name, version = %algorithm.version, "algorithm created");
    }

    // Second pass: dependency edges, each checked against the stored graph
    // before insertion.
    for algorithm in &registration.supported_algorithms {
        let algorithm_id = postgres::read_algorithm_id(
            &mut *tx,
            &algorithm.name,
            &algorithm.version,
            &registration.name,
            &registration.runtime,
        )
        .await?
        .ok_or_else(|| CoreError::AlgorithmNotFound {
            name: algorithm.name.clone(),
            version: algorithm.version.clone(),
            processor_name: registration.name.clone(),
            processor_runtime: registration.runtime.clone(),
        })?;

        for dependency in &algorithm.dependencies {
            add_dependency(&mut tx, registration, algorithm, algorithm_id, dependency).await?;
        }
    }

    tx.commit().await?;
    info!("processor registered");
    Ok(())
}

/// Check an incoming metadata field set against the fields stored for the
/// window type version. Any difference in count or name rejects the
/// registration; a version bump starts a fresh set.
fn check_metadata_fields(
    window_type: &proto::WindowType,
    stored_fields: &[store::MetadataFieldRecord],
) -> Result<(), CoreError> {
    let stored: BTreeSet<&str> = stored_fields.iter().map(|field| field.name.as_str()).collect();
    let incoming: BTreeSet<&str> = window_type
        .metadata_fields
        .iter()
        .map(|field| field.name.as_str())
        .collect();

    if stored != incoming {
        return Err(CoreError::WindowTypeMetadataChanged {
            window_type_name: window_type.name.clone(),
            window_type_version: window_type.version.clone(),
            stored: stored.into_iter().map(str::to_string).collect(),
            incoming: incoming.into_iter().map(str::to_string).collect(),
        });
    }
    Ok(())
}

/// Insert one dependency edge after checking it cannot close a cycle: the
/// dependent algorithm must not appear anywhere in the stored ancestry of
/// its upstream.
async fn add_dependency(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    registration: &proto::ProcessorRegistration,
    algorithm: &proto::Algorithm,
    algorithm_id: i64,
    dependency: &proto::AlgorithmDependency,
) -> Result<(), CoreError> {
    let lookback = dependency.lookback.clone().unwrap_or_default();
    if lookback.count > 0 && lookback.timedelta_seconds > 0 {
        return Err(CoreError::Validation {
            field: "lookback".to_string(),
            message: format!(
                "dependency of '{}' on '{}' sets both count and timedelta lookback",
                algorithm.name, dependency.name
            ),
        });
    }

    let upstream_id = postgres::read_algorithm_id(
        &mut **tx,
        &dependency.name,
        &dependency.version,
        &dependency.processor_name,
        &dependency.processor_runtime,
    )
    .await?
    .ok_or_else(|| CoreError::AlgorithmNotFound {
        name: dependency.name.clone(),
        version: dependency.version.clone(),
        processor_name: dependency.processor_name.clone(),
        processor_runtime: dependency.processor_runtime.clone(),
    })?;

    let paths = postgres::read_algorithm_execution_paths_for_algo(&mut **tx, upstream_id).await?;
    let algorithm_id_segment = algorithm_id.to_string();
    for path in &paths {
        if path
            .algo_id_path
            .split('.')
            .any(|segment| segment == algorithm_id_segment)
        {
            error!(
                from_algorithm = %dependency.name,
                to_algorithm = %algorithm.name,
                "found circular dependency"
            );
            return Err(CoreError::CircularDependency {
                from_name: dependency.name.clone(),
                from_version: dependency.version.clone(),
                from_processor: dependency.processor_name.clone(),
                to_name: algorithm.name.clone(),
                to_version: algorithm.version.clone(),
                to_processor: registration.name.clone(),
            });
        }
    }

    postgres::create_algorithm_dependency(
        &mut **tx,
        upstream_id,
        algorithm_id,
        lookback.count as i32,
        lookback.timedelta_seconds as i64,
    )
    .await
}
