// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage execution.
//!
//! Drives an execution plan against the registered processors: stages run
//! strictly in order, tasks within a stage in sequence, and every streamed
//! result is persisted as it arrives. A failed health check, stream error or
//! failed insert aborts the whole run; results persisted by earlier stages
//! stay in place.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use orca_protocol::proto::health_check_response::ServingStatus;
use orca_protocol::proto::orca_processor_client::OrcaProcessorClient;
use orca_protocol::proto::result::ResultData;
use orca_protocol::{channel, convert, proto};

use crate::error::CoreError;
use crate::plan::{AlgoDep, Plan};
use crate::store::postgres;
use crate::store::{AlgorithmRecord, InsertedWindow, ProcessorRecord, StoredResult};

/// Results produced so far in one run, keyed by algorithm id. Written by the
/// result-stream loop, read when composing downstream requests. Never shared
/// across runs.
type ResultMap = HashMap<i64, proto::AlgorithmResult>;

/// Execute a plan for an emitted window.
///
/// Spawned onto the runtime after the window commits; the EmitWindow caller
/// has already been answered, so failures here are logged and observable only
/// through the absence of results.
#[instrument(skip_all, fields(window_id = inserted.id, stages = plan.stages.len()))]
pub async fn run(
    pool: PgPool,
    production: bool,
    plan: Plan,
    window: proto::Window,
    inserted: InsertedWindow,
) -> Result<(), CoreError> {
    info!(
        affected_processors = ?plan.affected_processors,
        "starting plan execution"
    );

    let processors =
        postgres::read_processors_by_ids(&pool, &plan.affected_processors).await?;
    let processor_map: HashMap<i64, ProcessorRecord> =
        processors.into_iter().map(|p| (p.id, p)).collect();

    let algorithms = postgres::read_algorithms_for_window(
        &pool,
        &window.window_type_name,
        &window.window_type_version,
    )
    .await?;
    let algorithm_map: HashMap<i64, AlgorithmRecord> =
        algorithms.iter().cloned().map(|a| (a.id, a)).collect();

    let mut result_map: ResultMap = HashMap::new();

    for (stage_ix, stage) in plan.stages.iter().enumerate() {
        for task in &stage.tasks {
            let processor = processor_map
                .get(&task.proc_id)
                .ok_or(CoreError::ProcessorNotFound {
                    processor_id: task.proc_id,
                })?;

            let chan = channel::connect(&processor.connection_string, production)
                .await
                .map_err(|e| CoreError::ProcessorUnreachable {
                    processor: processor.name.clone(),
                    details: e.to_string(),
                })?;
            let mut client = OrcaProcessorClient::new(chan);

            let health = client
                .health_check(proto::HealthCheckRequest {
                    timestamp: Utc::now().timestamp(),
                })
                .await
                .map_err(|e| CoreError::ProcessorUnreachable {
                    processor: processor.name.clone(),
                    details: e.to_string(),
                })?
                .into_inner();
            if health.status() != ServingStatus::Serving {
                return Err(CoreError::ProcessorNotServing {
                    processor: processor.name.clone(),
                    status: format!("{:?}: {}", health.status(), health.message),
                });
            }

            let exec_id = Uuid::new_v4().simple().to_string();
            let mut algorithm_executions = Vec::with_capacity(task.nodes.len());
            for node in &task.nodes {
                let algorithm =
                    algorithm_map
                        .get(&node.algo_id)
                        .ok_or(CoreError::AlgorithmIdNotFound {
                            algorithm_id: node.algo_id,
                        })?;

                let mut dependencies = Vec::with_capacity(node.deps.len());
                for dep in &node.deps {
                    dependencies
                        .push(build_dependency_result(&pool, &algorithm_map, &result_map, dep).await?);
                }

                algorithm_executions.push(proto::ExecuteAlgorithm {
                    algorithm: Some(proto::Algorithm {
                        name: algorithm.name.clone(),
                        version: algorithm.version.clone(),
                        ..Default::default()
                    }),
                    dependencies,
                });
            }

            debug!(
                stage = stage_ix,
                proc_id = task.proc_id,
                %exec_id,
                nodes = task.nodes.len(),
                "dispatching DAG part"
            );

            let request = proto::ExecutionRequest {
                exec_id,
                window: Some(window.clone()),
                algorithm_executions,
            };
            let mut stream = client
                .execute_dag_part(request)
                .await
                .map_err(|e| CoreError::ExecutionStream {
                    processor: processor.name.clone(),
                    details: e.to_string(),
                })?
                .into_inner();

            loop {
                match stream.message().await {
                    Ok(Some(result)) => {
                        persist_result(&pool, &algorithms, &mut result_map, &inserted, result)
                            .await?;
                    }
                    Ok(None) => {
                        info!(proc_id = task.proc_id, "finished receiving execution results");
                        break;
                    }
                    Err(status)
                        if matches!(
                            status.code(),
                            tonic::Code::Cancelled | tonic::Code::DeadlineExceeded
                        ) =>
                    {
                        warn!(
                            proc_id = task.proc_id,
                            "context done while receiving execution results"
                        );
                        break;
                    }
                    Err(status) => {
                        error!(proc_id = task.proc_id, error = %status, "error receiving execution result");
                        return Err(CoreError::ExecutionStream {
                            processor: processor.name.clone(),
                            details: status.to_string(),
                        });
                    }
                }
            }
        }
    }

    info!("plan execution finished");
    Ok(())
}

/// Compose the result rows handed to a dependent algorithm for one upstream
/// dependency: the upstream's current result first, then any historical rows
/// its lookback requests.
async fn build_dependency_result(
    pool: &PgPool,
    algorithm_map: &HashMap<i64, AlgorithmRecord>,
    result_map: &ResultMap,
    dep: &AlgoDep,
) -> Result<proto::AlgorithmDependencyResult, CoreError> {
    // Upstream results land in the map as their stage completes; an entry is
    // always present here because layering puts the upstream in an earlier
    // stage of this same run.
    let latest = result_map.get(&dep.algo_id).cloned().unwrap_or_default();

    let mut rows = vec![proto::AlgorithmDependencyResultRow {
        result: latest.result.clone(),
        window: latest.window.clone(),
    }];

    let result_type = algorithm_map
        .get(&dep.algo_id)
        .map(|a| a.result_type.to_proto())
        .unwrap_or(proto::ResultType::NotSpecified);

    if dep.lookback.count > 0 {
        let search_to = latest
            .window
            .as_ref()
            .and_then(|w| w.time_to.as_ref())
            .and_then(convert::datetime_from_timestamp);
        if let Some(search_to) = search_to {
            let history = postgres::read_results_for_algorithm_by_count(
                pool,
                dep.algo_id,
                dep.lookback.count,
                search_to,
            )
            .await?;
            rows.extend(history.iter().filter_map(|record| lookback_row(result_type, record)));
        } else {
            debug!(algo_id = dep.algo_id, "upstream result carries no window; skipping count lookback");
        }
    } else if dep.lookback.timedelta > 0 {
        let search_to = latest
            .window
            .as_ref()
            .and_then(|w| w.time_from.as_ref())
            .and_then(convert::datetime_from_timestamp);
        if let Some(search_to) = search_to {
            let search_from = search_to - Duration::seconds(dep.lookback.timedelta);
            let history = postgres::read_results_for_algorithm_by_timedelta(
                pool,
                dep.algo_id,
                search_from,
                search_to,
            )
            .await?;
            rows.extend(history.iter().filter_map(|record| lookback_row(result_type, record)));
        } else {
            debug!(algo_id = dep.algo_id, "upstream result carries no window; skipping timedelta lookback");
        }
    }

    Ok(proto::AlgorithmDependencyResult {
        algorithm: latest.algorithm.clone(),
        result: rows,
    })
}

/// Materialise one stored historical result into a dependency row matching
/// the upstream algorithm's result type.
fn lookback_row(
    result_type: proto::ResultType,
    record: &StoredResult,
) -> Option<proto::AlgorithmDependencyResultRow> {
    let result_data = match result_type {
        proto::ResultType::Value => Some(ResultData::SingleValue(
            record.result_value.unwrap_or_default() as f32,
        )),
        proto::ResultType::Array => Some(ResultData::FloatValues(proto::FloatArray {
            values: record
                .result_array
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|v| *v as f32)
                .collect(),
        })),
        proto::ResultType::Struct => {
            let json = record.result_json.clone().unwrap_or(serde_json::Value::Null);
            Some(ResultData::StructValue(convert::json_to_struct(&json)))
        }
        proto::ResultType::None | proto::ResultType::NotSpecified => None,
    }?;

    Some(proto::AlgorithmDependencyResultRow {
        result: Some(proto::Result {
            result_data: Some(result_data),
            ..Default::default()
        }),
        window: None,
    })
}

/// Record a streamed result in the run's result map and persist it. The
/// value lands in the column matching its wire shape; the other columns stay
/// NULL.
async fn persist_result(
    pool: &PgPool,
    algorithms: &[AlgorithmRecord],
    result_map: &mut ResultMap,
    inserted: &InsertedWindow,
    result: proto::ExecutionResult,
) -> Result<(), CoreError> {
    let algorithm_result = result.algorithm_result.unwrap_or_default();
    let reported = algorithm_result.algorithm.clone().unwrap_or_default();

    let algorithm_id = algorithms
        .iter()
        .find(|a| a.name == reported.name && a.version == reported.version)
        .map(|a| a.id)
        .ok_or_else(|| CoreError::UnknownResultAlgorithm {
            name: reported.name.clone(),
            version: reported.version.clone(),
        })?;

    result_map.insert(algorithm_id, algorithm_result.clone());

    let (result_value, result_array, result_json) = match algorithm_result
        .result
        .as_ref()
        .and_then(|r| r.result_data.as_ref())
    {
        Some(ResultData::SingleValue(v)) => (Some(f64::from(*v)), None, None),
        Some(ResultData::FloatValues(array)) => (
            None,
            Some(array.values.iter().map(|v| f64::from(*v)).collect::<Vec<f64>>()),
            None,
        ),
        Some(ResultData::StructValue(s)) => (None, None, Some(convert::struct_to_json(s))),
        None => (None, None, None),
    };

    let result_id = postgres::create_result(
        pool,
        inserted.id,
        inserted.window_type_id,
        algorithm_id,
        result_value,
        result_array,
        result_json,
    )
    .await?;
    info!(result_id, algorithm_id, exec_id = %result.exec_id, "inserted result");

    Ok(())
}
