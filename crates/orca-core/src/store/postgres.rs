// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL queries for orca-core.
//!
//! All functions take an `impl PgExecutor` so the same query runs against the
//! shared pool or inside an open transaction. Registration threads one
//! transaction through every call; the executor persists each result with an
//! individual pool call.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::CoreError;

use super::{
    AlgorithmPathRecord, AlgorithmRecord, ExecutionPathRecord, InsertedWindow,
    MetadataFieldRecord, NewAlgorithm, ProcessorRecord, StoredResult, WindowTypeFieldLink,
    WindowTypeRecord,
};

// ============================================================================
// Registration
// ============================================================================

/// Create a processor, or refresh its connection string and project when the
/// `(name, runtime)` identity already exists.
pub async fn create_processor(
    exec: impl PgExecutor<'_>,
    name: &str,
    runtime: &str,
    connection_string: &str,
    project_name: Option<&str>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO processors (name, runtime, connection_string, project_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name, runtime)
        DO UPDATE SET connection_string = EXCLUDED.connection_string,
                      project_name = EXCLUDED.project_name
        "#,
    )
    .bind(name)
    .bind(runtime)
    .bind(connection_string)
    .bind(project_name)
    .execute(exec)
    .await?;

    Ok(())
}

/// Create a window type, returning the id of the existing row when the
/// `(name, version)` identity is already registered.
pub async fn create_window_type(
    exec: impl PgExecutor<'_>,
    name: &str,
    version: &str,
    description: &str,
) -> Result<i64, CoreError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO window_types (name, version, description)
        VALUES ($1, $2, $3)
        ON CONFLICT (name, version)
        DO UPDATE SET description = EXCLUDED.description
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(version)
    .bind(description)
    .fetch_one(exec)
    .await?;

    Ok(id)
}

/// Create a metadata field, returning the id of the existing row when the
/// `(name, description)` pair already exists.
pub async fn create_metadata_field(
    exec: impl PgExecutor<'_>,
    name: &str,
    description: &str,
) -> Result<i64, CoreError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO metadata_fields (name, description)
        VALUES ($1, $2)
        ON CONFLICT (name, description)
        DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(description)
    .fetch_one(exec)
    .await?;

    Ok(id)
}

/// Link a metadata field to a window type.
pub async fn link_window_type_metadata_field(
    exec: impl PgExecutor<'_>,
    window_type_id: i64,
    metadata_field_id: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO window_type_metadata_fields (window_type_id, metadata_field_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(window_type_id)
    .bind(metadata_field_id)
    .execute(exec)
    .await?;

    Ok(())
}

/// Read the metadata fields linked to a window type identified by
/// `(name, version)`.
pub async fn read_metadata_fields_by_window_type(
    exec: impl PgExecutor<'_>,
    name: &str,
    version: &str,
) -> Result<Vec<MetadataFieldRecord>, CoreError> {
    let fields = sqlx::query_as::<_, MetadataFieldRecord>(
        r#"
        SELECT mf.id, mf.name, mf.description
        FROM metadata_fields mf
        JOIN window_type_metadata_fields wtmf ON wtmf.metadata_field_id = mf.id
        JOIN window_types wt ON wt.id = wtmf.window_type_id
        WHERE wt.name = $1 AND wt.version = $2
        ORDER BY mf.name
        "#,
    )
    .bind(name)
    .bind(version)
    .fetch_all(exec)
    .await?;

    Ok(fields)
}

/// Create an algorithm row, or refresh its description, window type and
/// result type when the `(name, version, processor)` identity exists.
pub async fn create_algorithm(
    exec: impl PgExecutor<'_>,
    algorithm: &NewAlgorithm<'_>,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO algorithms (name, version, description, processor_id, window_type_id, result_type)
        SELECT $1, $2, $3, p.id, wt.id, $8
        FROM processors p, window_types wt
        WHERE p.name = $4 AND p.runtime = $5 AND wt.name = $6 AND wt.version = $7
        ON CONFLICT (name, version, processor_id)
        DO UPDATE SET description = EXCLUDED.description,
                      window_type_id = EXCLUDED.window_type_id,
                      result_type = EXCLUDED.result_type
        "#,
    )
    .bind(algorithm.name)
    .bind(algorithm.version)
    .bind(algorithm.description)
    .bind(algorithm.processor_name)
    .bind(algorithm.processor_runtime)
    .bind(algorithm.window_type_name)
    .bind(algorithm.window_type_version)
    .bind(algorithm.result_type)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::Database {
            operation: "create_algorithm".to_string(),
            details: format!(
                "processor '{}' ({}) or window type '{}' (version {}) not registered",
                algorithm.processor_name,
                algorithm.processor_runtime,
                algorithm.window_type_name,
                algorithm.window_type_version
            ),
        });
    }

    Ok(())
}

/// Resolve an algorithm id by its full `(name, version, processor)` identity.
pub async fn read_algorithm_id(
    exec: impl PgExecutor<'_>,
    name: &str,
    version: &str,
    processor_name: &str,
    processor_runtime: &str,
) -> Result<Option<i64>, CoreError> {
    let id: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT a.id
        FROM algorithms a
        JOIN processors p ON p.id = a.processor_id
        WHERE a.name = $1 AND a.version = $2 AND p.name = $3 AND p.runtime = $4
        "#,
    )
    .bind(name)
    .bind(version)
    .bind(processor_name)
    .bind(processor_runtime)
    .fetch_optional(exec)
    .await?;

    Ok(id.map(|(id,)| id))
}

/// Create a dependency edge from an upstream algorithm to a dependent one,
/// refreshing the lookback settings when the edge already exists.
pub async fn create_algorithm_dependency(
    exec: impl PgExecutor<'_>,
    from_algorithm_id: i64,
    to_algorithm_id: i64,
    lookback_count: i32,
    lookback_timedelta: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO algorithm_dependencies
            (from_algorithm_id, to_algorithm_id, lookback_count, lookback_timedelta)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (from_algorithm_id, to_algorithm_id)
        DO UPDATE SET lookback_count = EXCLUDED.lookback_count,
                      lookback_timedelta = EXCLUDED.lookback_timedelta
        "#,
    )
    .bind(from_algorithm_id)
    .bind(to_algorithm_id)
    .bind(lookback_count)
    .bind(lookback_timedelta)
    .execute(exec)
    .await?;

    Ok(())
}

// ============================================================================
// Execution Paths
// ============================================================================

/// Read every maximal dependency chain ending at the given algorithm: one
/// path per root it is reachable from, each running root-first down to the
/// algorithm itself.
///
/// Registration uses these to vet a new edge: a dependent algorithm showing
/// up in the ancestry of its upstream means the edge would close a cycle.
/// The guard against revisiting an algorithm already on the chain keeps the
/// recursion bounded even if the edge set were ever left cyclic.
pub async fn read_algorithm_execution_paths_for_algo(
    exec: impl PgExecutor<'_>,
    algorithm_id: i64,
) -> Result<Vec<AlgorithmPathRecord>, CoreError> {
    let paths = sqlx::query_as::<_, AlgorithmPathRecord>(
        r#"
        WITH RECURSIVE ancestry AS (
            SELECT a.id AS first_algo,
                   a.id::text AS algo_id_path,
                   a.window_type_id::text AS window_type_id_path,
                   a.processor_id::text AS proc_id_path
            FROM algorithms a
            WHERE a.id = $1
            UNION ALL
            SELECT a.id,
                   a.id::text || '.' || p.algo_id_path,
                   a.window_type_id::text || '.' || p.window_type_id_path,
                   a.processor_id::text || '.' || p.proc_id_path
            FROM ancestry p
            JOIN algorithm_dependencies d ON d.to_algorithm_id = p.first_algo
            JOIN algorithms a ON a.id = d.from_algorithm_id
            WHERE a.id::text <> ALL (string_to_array(p.algo_id_path, '.'))
        )
        SELECT algo_id_path, window_type_id_path, proc_id_path
        FROM ancestry p
        WHERE NOT EXISTS (
            SELECT 1 FROM algorithm_dependencies d WHERE d.to_algorithm_id = p.first_algo
        )
        ORDER BY algo_id_path
        "#,
    )
    .bind(algorithm_id)
    .fetch_all(exec)
    .await?;

    Ok(paths)
}

/// Read every maximal dependency chain rooted at an algorithm of the given
/// window type, with per-edge lookback settings.
pub async fn read_algorithm_execution_paths(
    exec: impl PgExecutor<'_>,
    window_type_id: i64,
) -> Result<Vec<ExecutionPathRecord>, CoreError> {
    let paths = sqlx::query_as::<_, ExecutionPathRecord>(
        r#"
        WITH RECURSIVE exec_paths AS (
            SELECT a.id AS last_algo,
                   a.id::text AS algo_id_path,
                   a.window_type_id::text AS window_type_id_path,
                   a.processor_id::text AS proc_id_path,
                   '0'::text AS lookback_count_path,
                   '0'::text AS lookback_timedelta_path
            FROM algorithms a
            WHERE a.window_type_id = $1
              AND NOT EXISTS (
                SELECT 1 FROM algorithm_dependencies d WHERE d.to_algorithm_id = a.id
            )
            UNION ALL
            SELECT a.id,
                   p.algo_id_path || '.' || a.id::text,
                   p.window_type_id_path || '.' || a.window_type_id::text,
                   p.proc_id_path || '.' || a.processor_id::text,
                   p.lookback_count_path || '.' || d.lookback_count::text,
                   p.lookback_timedelta_path || '.' || d.lookback_timedelta::text
            FROM exec_paths p
            JOIN algorithm_dependencies d ON d.from_algorithm_id = p.last_algo
            JOIN algorithms a ON a.id = d.to_algorithm_id
            WHERE a.id::text <> ALL (string_to_array(p.algo_id_path, '.'))
        )
        SELECT algo_id_path, window_type_id_path, proc_id_path,
               lookback_count_path, lookback_timedelta_path
        FROM exec_paths p
        WHERE NOT EXISTS (
            SELECT 1 FROM algorithm_dependencies d WHERE d.from_algorithm_id = p.last_algo
        )
        ORDER BY algo_id_path
        "#,
    )
    .bind(window_type_id)
    .fetch_all(exec)
    .await?;

    Ok(paths)
}

// ============================================================================
// Windows and Results
// ============================================================================

/// Insert a window of the given type. Fails with
/// [`CoreError::WindowTypeMissing`] when the `(name, version)` identity is
/// not registered.
#[allow(clippy::too_many_arguments)]
pub async fn register_window(
    exec: impl PgExecutor<'_>,
    window_type_name: &str,
    window_type_version: &str,
    time_from: DateTime<Utc>,
    time_to: DateTime<Utc>,
    origin: &str,
    metadata: &serde_json::Value,
) -> Result<InsertedWindow, CoreError> {
    let inserted = sqlx::query_as::<_, InsertedWindow>(
        r#"
        INSERT INTO windows (window_type_id, time_from, time_to, origin, metadata)
        SELECT wt.id, $3, $4, $5, $6
        FROM window_types wt
        WHERE wt.name = $1 AND wt.version = $2
        RETURNING id, window_type_id
        "#,
    )
    .bind(window_type_name)
    .bind(window_type_version)
    .bind(time_from)
    .bind(time_to)
    .bind(origin)
    .bind(metadata)
    .fetch_optional(exec)
    .await?;

    inserted.ok_or_else(|| CoreError::WindowTypeMissing {
        window_type_name: window_type_name.to_string(),
        window_type_version: window_type_version.to_string(),
    })
}

/// Read the last `count` results of an algorithm whose window ended before
/// `search_to`, newest first. The strict bound keeps the spawning window's
/// own (already persisted) result out of its downstream history rows.
pub async fn read_results_for_algorithm_by_count(
    exec: impl PgExecutor<'_>,
    algorithm_id: i64,
    count: i64,
    search_to: DateTime<Utc>,
) -> Result<Vec<StoredResult>, CoreError> {
    let results = sqlx::query_as::<_, StoredResult>(
        r#"
        SELECT r.id, r.window_id, r.result_value, r.result_array, r.result_json,
               w.time_from, w.time_to
        FROM results r
        JOIN windows w ON w.id = r.window_id
        WHERE r.algorithm_id = $1 AND w.time_to < $2
        ORDER BY w.time_to DESC
        LIMIT $3
        "#,
    )
    .bind(algorithm_id)
    .bind(search_to)
    .bind(count)
    .fetch_all(exec)
    .await?;

    Ok(results)
}

/// Read the results of an algorithm whose window started inside
/// `[search_from, search_to)`, newest first.
pub async fn read_results_for_algorithm_by_timedelta(
    exec: impl PgExecutor<'_>,
    algorithm_id: i64,
    search_from: DateTime<Utc>,
    search_to: DateTime<Utc>,
) -> Result<Vec<StoredResult>, CoreError> {
    let results = sqlx::query_as::<_, StoredResult>(
        r#"
        SELECT r.id, r.window_id, r.result_value, r.result_array, r.result_json,
               w.time_from, w.time_to
        FROM results r
        JOIN windows w ON w.id = r.window_id
        WHERE r.algorithm_id = $1 AND w.time_from >= $2 AND w.time_from < $3
        ORDER BY w.time_from DESC
        "#,
    )
    .bind(algorithm_id)
    .bind(search_from)
    .bind(search_to)
    .fetch_all(exec)
    .await?;

    Ok(results)
}

/// Persist one algorithm result for a window. Only the column matching the
/// algorithm's result type carries a value.
pub async fn create_result(
    exec: impl PgExecutor<'_>,
    window_id: i64,
    window_type_id: i64,
    algorithm_id: i64,
    result_value: Option<f64>,
    result_array: Option<Vec<f64>>,
    result_json: Option<serde_json::Value>,
) -> Result<i64, CoreError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO results
            (window_id, window_type_id, algorithm_id, result_value, result_array, result_json)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(window_id)
    .bind(window_type_id)
    .bind(algorithm_id)
    .bind(result_value)
    .bind(result_array)
    .bind(result_json)
    .fetch_one(exec)
    .await?;

    Ok(id)
}

// ============================================================================
// Bulk Reads
// ============================================================================

/// Read the processors with the given ids.
pub async fn read_processors_by_ids(
    exec: impl PgExecutor<'_>,
    ids: &[i64],
) -> Result<Vec<ProcessorRecord>, CoreError> {
    let processors = sqlx::query_as::<_, ProcessorRecord>(
        r#"
        SELECT id, name, runtime, connection_string, project_name
        FROM processors
        WHERE id = ANY ($1)
        ORDER BY id
        "#,
    )
    .bind(ids)
    .fetch_all(exec)
    .await?;

    Ok(processors)
}

/// Read the algorithms bound to a window type identified by `(name, version)`.
pub async fn read_algorithms_for_window(
    exec: impl PgExecutor<'_>,
    window_type_name: &str,
    window_type_version: &str,
) -> Result<Vec<AlgorithmRecord>, CoreError> {
    let algorithms = sqlx::query_as::<_, AlgorithmRecord>(
        r#"
        SELECT a.id, a.name, a.version, a.description, a.processor_id,
               a.window_type_id, a.result_type
        FROM algorithms a
        JOIN window_types wt ON wt.id = a.window_type_id
        WHERE wt.name = $1 AND wt.version = $2
        ORDER BY a.id
        "#,
    )
    .bind(window_type_name)
    .bind(window_type_version)
    .fetch_all(exec)
    .await?;

    Ok(algorithms)
}

/// Read all registered processors.
pub async fn read_processors(
    exec: impl PgExecutor<'_>,
) -> Result<Vec<ProcessorRecord>, CoreError> {
    let processors = sqlx::query_as::<_, ProcessorRecord>(
        r#"
        SELECT id, name, runtime, connection_string, project_name
        FROM processors
        ORDER BY id
        "#,
    )
    .fetch_all(exec)
    .await?;

    Ok(processors)
}

/// Read all registered window types.
pub async fn read_window_types(
    exec: impl PgExecutor<'_>,
) -> Result<Vec<WindowTypeRecord>, CoreError> {
    let window_types = sqlx::query_as::<_, WindowTypeRecord>(
        r#"
        SELECT id, name, version, description
        FROM window_types
        ORDER BY id
        "#,
    )
    .fetch_all(exec)
    .await?;

    Ok(window_types)
}

/// Read all registered algorithms.
pub async fn read_algorithms(
    exec: impl PgExecutor<'_>,
) -> Result<Vec<AlgorithmRecord>, CoreError> {
    let algorithms = sqlx::query_as::<_, AlgorithmRecord>(
        r#"
        SELECT id, name, version, description, processor_id, window_type_id, result_type
        FROM algorithms
        ORDER BY id
        "#,
    )
    .fetch_all(exec)
    .await?;

    Ok(algorithms)
}

/// Read every metadata field together with the window type it is linked to.
pub async fn read_window_type_field_links(
    exec: impl PgExecutor<'_>,
) -> Result<Vec<WindowTypeFieldLink>, CoreError> {
    let links = sqlx::query_as::<_, WindowTypeFieldLink>(
        r#"
        SELECT wtmf.window_type_id, mf.name, mf.description
        FROM window_type_metadata_fields wtmf
        JOIN metadata_fields mf ON mf.id = wtmf.metadata_field_id
        ORDER BY wtmf.window_type_id, mf.name
        "#,
    )
    .fetch_all(exec)
    .await?;

    Ok(links)
}
