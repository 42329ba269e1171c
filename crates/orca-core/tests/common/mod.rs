// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for orca-core E2E tests.
//!
//! Provides TestContext for setting up the database, the core gRPC server
//! and an in-process mock processor.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::PgPool;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use orca_core::config::Config;
use orca_core::handlers::HandlerState;
use orca_core::server;
use orca_protocol::proto;
use orca_protocol::proto::orca_core_client::OrcaCoreClient;
use orca_protocol::proto::orca_processor_server::{OrcaProcessor, OrcaProcessorServer};
use orca_protocol::proto::result::ResultData;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Test context that manages database, core server, mock processor and
/// client for E2E tests.
pub struct TestContext {
    pub pool: PgPool,
    pub client: OrcaCoreClient<Channel>,
    pub core_addr: SocketAddr,
    pub processor_addr: SocketAddr,
    /// Every ExecutionRequest the mock processor received, in arrival order.
    pub requests: Arc<Mutex<Vec<proto::ExecutionRequest>>>,
}

impl TestContext {
    /// Create a new test context.
    ///
    /// This sets up:
    /// 1. Database connection from TEST_DATABASE_URL (migrations applied)
    /// 2. The core gRPC server on an available port
    /// 3. A mock processor gRPC server on an available port
    /// 4. A client connected to the core server
    pub async fn new() -> Option<Self> {
        // 1. Get database URL from environment
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

        // 2. Connect to test database and ensure the schema exists
        let pool = PgPool::connect(&database_url).await.ok()?;
        MIGRATOR.run(&pool).await.ok()?;

        // 3. Find available ports for both servers
        let core_addr = free_local_addr()?;
        let processor_addr = free_local_addr()?;

        // 4. Start the core server in the background
        let config = Arc::new(Config {
            connection_string: database_url,
            listen_addr: core_addr,
            log_level: "INFO".to_string(),
            is_production: false,
        });
        let state = Arc::new(HandlerState::new(pool.clone(), config));
        tokio::spawn(async move {
            if let Err(e) = server::run_server(core_addr, state).await {
                eprintln!("Test core server error: {}", e);
            }
        });

        // 5. Start the mock processor in the background
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mock = MockProcessor {
            requests: requests.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = tonic::transport::Server::builder()
                .add_service(OrcaProcessorServer::new(mock))
                .serve(processor_addr)
                .await
            {
                eprintln!("Test mock processor error: {}", e);
            }
        });

        // 6. Wait for the servers to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 7. Connect the client
        let client = OrcaCoreClient::connect(format!("http://{}", core_addr))
            .await
            .ok()?;

        Some(Self {
            pool,
            client,
            core_addr,
            processor_addr,
            requests,
        })
    }

    /// The mock processor's address as a connection string for registration.
    pub fn processor_conn_str(&self) -> String {
        self.processor_addr.to_string()
    }

    /// Count persisted results for a window type, across all its windows.
    pub async fn count_results(&self, window_type_name: &str) -> i64 {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM results r
            JOIN window_types wt ON wt.id = r.window_type_id
            WHERE wt.name = $1
            "#,
        )
        .bind(window_type_name)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten();
        row.map(|r| r.0).unwrap_or(0)
    }

    /// Poll until `expected` results exist for the window type, or panic
    /// after a few seconds.
    pub async fn wait_for_results(&self, window_type_name: &str, expected: i64) {
        for _ in 0..100 {
            if self.count_results(window_type_name).await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "timed out waiting for {} results of window type '{}' (have {})",
            expected,
            window_type_name,
            self.count_results(window_type_name).await
        );
    }

    /// Read persisted float results of one algorithm of one window type,
    /// newest window first.
    pub async fn float_results_for_algorithm(
        &self,
        algorithm_name: &str,
        window_type_name: &str,
    ) -> Vec<Option<f64>> {
        let rows: Vec<(Option<f64>,)> = sqlx::query_as(
            r#"
            SELECT r.result_value FROM results r
            JOIN algorithms a ON a.id = r.algorithm_id
            JOIN window_types wt ON wt.id = a.window_type_id
            JOIN windows w ON w.id = r.window_id
            WHERE a.name = $1 AND wt.name = $2
            ORDER BY w.time_to DESC
            "#,
        )
        .bind(algorithm_name)
        .bind(window_type_name)
        .fetch_all(&self.pool)
        .await
        .expect("failed to read results");
        rows.into_iter().map(|r| r.0).collect()
    }

    /// All ExecutionRequests the mock processor has received so far.
    pub fn received_requests(&self) -> Vec<proto::ExecutionRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

/// A per-run unique name, so repeated test runs against the same database
/// never collide with earlier rows.
pub fn unique(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

fn free_local_addr() -> Option<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").ok()?;
    let addr = listener.local_addr().ok()?;
    drop(listener);
    Some(addr)
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

// ============================================================================
// Mock Processor
// ============================================================================

/// A processor that answers every health check with SERVING and streams one
/// VALUE result per requested algorithm. The value is the emitted window's
/// `time_to` in seconds, so results are distinguishable across windows.
pub struct MockProcessor {
    pub requests: Arc<Mutex<Vec<proto::ExecutionRequest>>>,
}

#[tonic::async_trait]
impl OrcaProcessor for MockProcessor {
    async fn health_check(
        &self,
        _request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        Ok(Response::new(proto::HealthCheckResponse {
            status: proto::health_check_response::ServingStatus::Serving as i32,
            message: "ok".to_string(),
            metrics: Default::default(),
        }))
    }

    type ExecuteDagPartStream = ReceiverStream<Result<proto::ExecutionResult, Status>>;

    async fn execute_dag_part(
        &self,
        request: Request<proto::ExecutionRequest>,
    ) -> Result<Response<Self::ExecuteDagPartStream>, Status> {
        let request = request.into_inner();
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());

        let window = request.window.clone();
        let value = window
            .as_ref()
            .and_then(|w| w.time_to.as_ref())
            .map(|t| t.seconds as f32)
            .unwrap_or_default();

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        for execution in &request.algorithm_executions {
            let result = proto::ExecutionResult {
                exec_id: request.exec_id.clone(),
                algorithm_result: Some(proto::AlgorithmResult {
                    algorithm: execution.algorithm.clone(),
                    result: Some(proto::Result {
                        result_data: Some(ResultData::SingleValue(value)),
                        ..Default::default()
                    }),
                    window: window.clone(),
                }),
            };
            tx.send(Ok(result)).await.expect("mock stream channel full");
        }

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

// ============================================================================
// Message Builders
// ============================================================================

pub fn metadata_field(name: &str, description: &str) -> proto::MetadataField {
    proto::MetadataField {
        name: name.to_string(),
        description: description.to_string(),
    }
}

pub fn window_type(
    name: &str,
    version: &str,
    metadata_fields: Vec<proto::MetadataField>,
) -> proto::WindowType {
    proto::WindowType {
        name: name.to_string(),
        version: version.to_string(),
        description: String::new(),
        metadata_fields,
    }
}

pub fn algorithm(name: &str, version: &str, window_type: proto::WindowType) -> proto::Algorithm {
    proto::Algorithm {
        name: name.to_string(),
        version: version.to_string(),
        window_type: Some(window_type),
        result_type: proto::ResultType::Value as i32,
        description: String::new(),
        dependencies: Vec::new(),
    }
}

pub fn dependency(
    name: &str,
    version: &str,
    processor_name: &str,
    processor_runtime: &str,
) -> proto::AlgorithmDependency {
    proto::AlgorithmDependency {
        name: name.to_string(),
        version: version.to_string(),
        processor_name: processor_name.to_string(),
        processor_runtime: processor_runtime.to_string(),
        lookback: None,
    }
}

pub fn registration(
    name: &str,
    runtime: &str,
    connection_str: &str,
    supported_algorithms: Vec<proto::Algorithm>,
) -> proto::ProcessorRegistration {
    proto::ProcessorRegistration {
        name: name.to_string(),
        runtime: runtime.to_string(),
        connection_str: connection_str.to_string(),
        project_name: "test".to_string(),
        supported_algorithms,
    }
}

pub fn window(
    window_type_name: &str,
    window_type_version: &str,
    from_seconds: i64,
    to_seconds: i64,
    metadata: Option<prost_types::Struct>,
) -> proto::Window {
    proto::Window {
        window_type_name: window_type_name.to_string(),
        window_type_version: window_type_version.to_string(),
        time_from: Some(prost_types::Timestamp {
            seconds: from_seconds,
            nanos: 0,
        }),
        time_to: Some(prost_types::Timestamp {
            seconds: to_seconds,
            nanos: 0,
        }),
        origin: "test".to_string(),
        metadata,
    }
}

pub fn number_metadata(pairs: &[(&str, f64)]) -> prost_types::Struct {
    prost_types::Struct {
        fields: pairs
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    prost_types::Value {
                        kind: Some(prost_types::value::Kind::NumberValue(*value)),
                    },
                )
            })
            .collect(),
    }
}
