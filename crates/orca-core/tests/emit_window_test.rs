// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for window emission: staged execution against a mock processor,
//! dependency result plumbing, count lookbacks and rejection paths.

mod common;

use common::*;
use orca_protocol::proto;

/// Algorithm names carried by one ExecutionRequest.
fn executed_algorithms(request: &proto::ExecutionRequest) -> Vec<String> {
    request
        .algorithm_executions
        .iter()
        .filter_map(|e| e.algorithm.as_ref().map(|a| a.name.clone()))
        .collect()
}

/// Requests for a given window type, in arrival order.
fn requests_for_window_type(
    requests: &[proto::ExecutionRequest],
    window_type_name: &str,
) -> Vec<proto::ExecutionRequest> {
    requests
        .iter()
        .filter(|r| {
            r.window
                .as_ref()
                .map(|w| w.window_type_name == window_type_name)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// The single-value payload of a dependency result row.
fn row_value(row: &proto::AlgorithmDependencyResultRow) -> Option<f32> {
    match row.result.as_ref()?.result_data.as_ref()? {
        proto::result::ResultData::SingleValue(v) => Some(*v),
        _ => None,
    }
}

#[tokio::test]
async fn test_linear_chain_executes_in_stages() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let conn_str = ctx.processor_conn_str();
    let processor_name = unique("EmitChainProcessor");
    let wt_name = unique("EmitChainWindow");
    let wt = window_type(&wt_name, "1.0.0", Vec::new());

    // A1 -> A2 -> A3, all on one processor
    let algo_1 = algorithm("EmitChainAlgo1", "1.0.0", wt.clone());
    let mut algo_2 = algorithm("EmitChainAlgo2", "1.0.0", wt.clone());
    algo_2.dependencies = vec![dependency(
        "EmitChainAlgo1",
        "1.0.0",
        &processor_name,
        "test",
    )];
    let mut algo_3 = algorithm("EmitChainAlgo3", "1.0.0", wt.clone());
    algo_3.dependencies = vec![dependency(
        "EmitChainAlgo2",
        "1.0.0",
        &processor_name,
        "test",
    )];

    ctx.client
        .register_processor(registration(
            &processor_name,
            "test",
            &conn_str,
            vec![algo_1, algo_2, algo_3],
        ))
        .await
        .expect("registration failed");

    let emit_status = ctx
        .client
        .emit_window(window(&wt_name, "1.0.0", 0, 60, None))
        .await
        .expect("emit failed")
        .into_inner();
    assert_eq!(
        emit_status.status,
        proto::window_emit_status::Status::ProcessingTriggered as i32
    );

    ctx.wait_for_results(&wt_name, 3).await;

    // One request per stage, each executing the next link of the chain
    let requests = requests_for_window_type(&ctx.received_requests(), &wt_name);
    assert_eq!(requests.len(), 3);
    assert_eq!(executed_algorithms(&requests[0]), vec!["EmitChainAlgo1"]);
    assert_eq!(executed_algorithms(&requests[1]), vec!["EmitChainAlgo2"]);
    assert_eq!(executed_algorithms(&requests[2]), vec!["EmitChainAlgo3"]);

    // Stage 1 hands A2 the result of A1 as its first dependency row
    let algo_2_execution = &requests[1].algorithm_executions[0];
    assert_eq!(algo_2_execution.dependencies.len(), 1);
    let dep = &algo_2_execution.dependencies[0];
    assert_eq!(
        dep.algorithm.as_ref().map(|a| a.name.as_str()),
        Some("EmitChainAlgo1")
    );
    assert_eq!(dep.result.len(), 1);
    assert_eq!(row_value(&dep.result[0]), Some(60.0));
    assert!(dep.result[0].window.is_some());

    // Exec ids are fresh 32-hex per task
    assert_eq!(requests[0].exec_id.len(), 32);
    assert_ne!(requests[0].exec_id, requests[1].exec_id);
}

#[tokio::test]
async fn test_fork_join_across_processors() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let conn_str = ctx.processor_conn_str();
    let processor_1 = unique("EmitForkProcessor1");
    let processor_2 = unique("EmitForkProcessor2");
    let processor_3 = unique("EmitForkProcessor3");
    let wt_name = unique("EmitForkWindow");
    let wt = window_type(&wt_name, "1.0.0", Vec::new());

    // P1 hosts the root
    ctx.client
        .register_processor(registration(
            &processor_1,
            "test",
            &conn_str,
            vec![algorithm("EmitForkAlgo1", "1.0.0", wt.clone())],
        ))
        .await
        .expect("registration of P1 failed");

    // P2 hosts the fork
    let mut algo_2 = algorithm("EmitForkAlgo2", "1.0.0", wt.clone());
    algo_2.dependencies = vec![dependency("EmitForkAlgo1", "1.0.0", &processor_1, "test")];
    let mut algo_3 = algorithm("EmitForkAlgo3", "1.0.0", wt.clone());
    algo_3.dependencies = vec![dependency("EmitForkAlgo1", "1.0.0", &processor_1, "test")];
    ctx.client
        .register_processor(registration(
            &processor_2,
            "test",
            &conn_str,
            vec![algo_2, algo_3],
        ))
        .await
        .expect("registration of P2 failed");

    // P3 hosts the join
    let mut algo_4 = algorithm("EmitForkAlgo4", "1.0.0", wt.clone());
    algo_4.dependencies = vec![
        dependency("EmitForkAlgo2", "1.0.0", &processor_2, "test"),
        dependency("EmitForkAlgo3", "1.0.0", &processor_2, "test"),
    ];
    ctx.client
        .register_processor(registration(
            &processor_3,
            "test",
            &conn_str,
            vec![algo_4],
        ))
        .await
        .expect("registration of P3 failed");

    ctx.client
        .emit_window(window(&wt_name, "1.0.0", 0, 60, None))
        .await
        .expect("emit failed");

    ctx.wait_for_results(&wt_name, 4).await;

    // Three tasks: [A1], [A2, A3], [A4]
    let requests = requests_for_window_type(&ctx.received_requests(), &wt_name);
    assert_eq!(requests.len(), 3);
    assert_eq!(executed_algorithms(&requests[0]), vec!["EmitForkAlgo1"]);
    assert_eq!(
        executed_algorithms(&requests[1]),
        vec!["EmitForkAlgo2", "EmitForkAlgo3"]
    );
    assert_eq!(executed_algorithms(&requests[2]), vec!["EmitForkAlgo4"]);

    // The join receives both fork results
    let join_execution = &requests[2].algorithm_executions[0];
    let dep_names: Vec<_> = join_execution
        .dependencies
        .iter()
        .filter_map(|d| d.algorithm.as_ref().map(|a| a.name.clone()))
        .collect();
    assert_eq!(dep_names, vec!["EmitForkAlgo2", "EmitForkAlgo3"]);
}

#[tokio::test]
async fn test_count_lookback_includes_history_newest_first() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let conn_str = ctx.processor_conn_str();
    let processor_name = unique("EmitLookbackProcessor");
    let wt_name = unique("EmitLookbackWindow");
    let wt = window_type(&wt_name, "1.0.0", Vec::new());

    let algo_1 = algorithm("EmitLookbackAlgo1", "1.0.0", wt.clone());
    let mut algo_2 = algorithm("EmitLookbackAlgo2", "1.0.0", wt.clone());
    let mut dep = dependency("EmitLookbackAlgo1", "1.0.0", &processor_name, "test");
    dep.lookback = Some(proto::Lookback {
        count: 2,
        timedelta_seconds: 0,
    });
    algo_2.dependencies = vec![dep];

    ctx.client
        .register_processor(registration(
            &processor_name,
            "test",
            &conn_str,
            vec![algo_1, algo_2],
        ))
        .await
        .expect("registration failed");

    // Emit three windows in time order; the mock reports each window's
    // time_to as the result value, so history is distinguishable
    for (from, to, expected_results) in [(0, 100, 2), (100, 200, 4), (200, 300, 6)] {
        ctx.client
            .emit_window(window(&wt_name, "1.0.0", from, to, None))
            .await
            .expect("emit failed");
        ctx.wait_for_results(&wt_name, expected_results).await;
    }

    let requests = requests_for_window_type(&ctx.received_requests(), &wt_name);
    let request_for_window = |from: i64| -> Option<proto::ExecutionRequest> {
        requests
            .iter()
            .find(|r| {
                r.window
                    .as_ref()
                    .and_then(|w| w.time_from.as_ref())
                    .map(|t| t.seconds == from)
                    .unwrap_or(false)
                    && executed_algorithms(r).contains(&"EmitLookbackAlgo2".to_string())
            })
            .cloned()
    };

    // The third window's A2 request: current result plus two historical
    // rows, newest first
    let request = request_for_window(200).expect("no A2 request for the third window");
    let dep = &request.algorithm_executions[0].dependencies[0];
    let values: Vec<_> = dep.result.iter().filter_map(row_value).collect();
    assert_eq!(values, vec![300.0, 200.0, 100.0]);
    assert!(dep.result[0].window.is_some());
    assert!(dep.result[1].window.is_none());

    // The second window only has one window of history
    let request = request_for_window(100).expect("no A2 request for the second window");
    let dep = &request.algorithm_executions[0].dependencies[0];
    let values: Vec<_> = dep.result.iter().filter_map(row_value).collect();
    assert_eq!(values, vec![200.0, 100.0]);

    // Persisted A1 results cover all three windows, newest first
    assert_eq!(
        ctx.float_results_for_algorithm("EmitLookbackAlgo1", &wt_name)
            .await,
        vec![Some(300.0), Some(200.0), Some(100.0)]
    );
}

#[tokio::test]
async fn test_missing_metadata_field_fails_triggering() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let conn_str = ctx.processor_conn_str();
    let wt_name = unique("EmitMetadataWindow");
    let wt = window_type(
        &wt_name,
        "1.0.0",
        vec![
            metadata_field("asset_id", "Unique ID of the asset"),
            metadata_field("fleet_id", "Unique ID of the fleet"),
        ],
    );
    ctx.client
        .register_processor(registration(
            &unique("EmitMetadataProcessor"),
            "test",
            &conn_str,
            vec![algorithm("EmitMetadataAlgo", "1.0.0", wt)],
        ))
        .await
        .expect("registration failed");

    let emit_status = ctx
        .client
        .emit_window(window(
            &wt_name,
            "1.0.0",
            0,
            60,
            Some(number_metadata(&[("asset_id", 0.0)])),
        ))
        .await
        .expect("emit should answer with a status payload")
        .into_inner();
    assert_eq!(
        emit_status.status,
        proto::window_emit_status::Status::TriggeringFailed as i32
    );
    assert!(emit_status.message.contains("fleet_id"));

    // Nothing was committed for the rejected window
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM windows w
        JOIN window_types wt ON wt.id = w.window_type_id
        WHERE wt.name = $1
        "#,
    )
    .bind(&wt_name)
    .fetch_one(&ctx.pool)
    .await
    .expect("failed to count windows");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_unregistered_window_type_fails_triggering() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let emit_status = ctx
        .client
        .emit_window(window(
            &unique("EmitNeverRegisteredWindow"),
            "1.0.0",
            0,
            60,
            None,
        ))
        .await
        .expect("emit should answer with a status payload")
        .into_inner();
    assert_eq!(
        emit_status.status,
        proto::window_emit_status::Status::TriggeringFailed as i32
    );
    assert!(emit_status.message.contains("does not exist"));
}

#[tokio::test]
async fn test_window_without_root_algorithms_commits_without_triggering() {
    skip_if_no_db!();

    let Some(mut ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let conn_str = ctx.processor_conn_str();
    let processor_name = unique("EmitQuietProcessor");
    let quiet_wt_name = unique("EmitQuietWindow");

    // The only algorithm of the quiet window type depends on an algorithm
    // of a different window type, so the quiet type has no rooted paths
    let upstream_wt = window_type(&unique("EmitQuietUpstreamWindow"), "1.0.0", Vec::new());
    let quiet_wt = window_type(&quiet_wt_name, "1.0.0", Vec::new());

    let upstream = algorithm("EmitQuietUpstreamAlgo", "1.0.0", upstream_wt);
    let mut downstream = algorithm("EmitQuietAlgo", "1.0.0", quiet_wt);
    downstream.dependencies = vec![dependency(
        "EmitQuietUpstreamAlgo",
        "1.0.0",
        &processor_name,
        "test",
    )];

    ctx.client
        .register_processor(registration(
            &processor_name,
            "test",
            &conn_str,
            vec![upstream, downstream],
        ))
        .await
        .expect("registration failed");

    let emit_status = ctx
        .client
        .emit_window(window(&quiet_wt_name, "1.0.0", 0, 60, None))
        .await
        .expect("emit failed")
        .into_inner();
    assert_eq!(
        emit_status.status,
        proto::window_emit_status::Status::NoTriggeredAlgorithms as i32
    );

    // The window row itself is still committed
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM windows w
        JOIN window_types wt ON wt.id = w.window_type_id
        WHERE wt.name = $1
        "#,
    )
    .bind(&quiet_wt_name)
    .fetch_one(&ctx.pool)
    .await
    .expect("failed to count windows");
    assert_eq!(count, 1);
}
