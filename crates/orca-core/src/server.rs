// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC facade for orca-core.
//!
//! Implements the `OrcaCore` service: schema validation of incoming messages
//! and dispatch to the handlers. User-caused failures surface verbatim in
//! the gRPC status; EmitWindow reports triggering problems in its response
//! payload instead.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use orca_protocol::proto;
use orca_protocol::proto::orca_core_server::{OrcaCore, OrcaCoreServer};

use crate::error::CoreError;
use crate::handlers::{self, HandlerState};

/// The OrcaCore gRPC service.
pub struct OrcaCoreService {
    state: Arc<HandlerState>,
}

impl OrcaCoreService {
    /// Create a new service over the shared handler state.
    pub fn new(state: Arc<HandlerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl OrcaCore for OrcaCoreService {
    async fn register_processor(
        &self,
        request: Request<proto::ProcessorRegistration>,
    ) -> Result<Response<proto::RegistrationStatus>, Status> {
        let registration = request.into_inner();
        validate_registration(&registration).map_err(|e| e.to_status())?;

        info!(processor = %registration.name, "registering processor");
        match handlers::handle_register_processor(&self.state, &registration).await {
            Ok(status) => Ok(Response::new(status)),
            Err(err) => {
                error!(processor = %registration.name, error = %err, "processor registration failed");
                Err(err.to_status())
            }
        }
    }

    async fn emit_window(
        &self,
        request: Request<proto::Window>,
    ) -> Result<Response<proto::WindowEmitStatus>, Status> {
        let window = request.into_inner();
        validate_window(&window).map_err(|e| e.to_status())?;

        info!(
            window_type = %window.window_type_name,
            version = %window.window_type_version,
            "emitting window"
        );
        match handlers::handle_emit_window(&self.state, window).await {
            Ok(status) => Ok(Response::new(status)),
            Err(err) if err.is_triggering_failure() => {
                warn!(error = %err, "window triggering failed");
                Ok(Response::new(proto::WindowEmitStatus {
                    status: proto::window_emit_status::Status::TriggeringFailed as i32,
                    message: err.to_string(),
                }))
            }
            Err(err) => {
                error!(error = %err, "emit window failed");
                Err(err.to_status())
            }
        }
    }

    async fn expose(
        &self,
        request: Request<proto::ExposeSettings>,
    ) -> Result<Response<proto::InternalState>, Status> {
        let settings = request.into_inner();
        debug!("received request to expose internal state");
        match handlers::handle_expose(&self.state, &settings).await {
            Ok(internal_state) => Ok(Response::new(internal_state)),
            Err(err) => {
                error!(error = %err, "expose failed");
                Err(err.to_status())
            }
        }
    }
}

/// Serve the OrcaCore gRPC service on the given address until the process
/// shuts down.
pub async fn run_server(
    addr: SocketAddr,
    state: Arc<HandlerState>,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, "starting OrcaCore gRPC server");
    Server::builder()
        .add_service(OrcaCoreServer::new(OrcaCoreService::new(state)))
        .serve(addr)
        .await
}

// ============================================================================
// Message Validation
// ============================================================================

fn require(field: &'static str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() {
        return Err(CoreError::Validation {
            field: field.to_string(),
            message: "is required".to_string(),
        });
    }
    Ok(())
}

/// Schema validation of a processor registration.
pub fn validate_registration(
    registration: &proto::ProcessorRegistration,
) -> Result<(), CoreError> {
    require("name", &registration.name)?;
    require("runtime", &registration.runtime)?;
    require("connection_str", &registration.connection_str)?;

    for algorithm in &registration.supported_algorithms {
        require("supported_algorithms.name", &algorithm.name)?;
        require("supported_algorithms.version", &algorithm.version)?;

        let window_type = algorithm
            .window_type
            .as_ref()
            .ok_or_else(|| CoreError::Validation {
                field: "supported_algorithms.window_type".to_string(),
                message: format!("algorithm '{}' declares no window type", algorithm.name),
            })?;
        require("window_type.name", &window_type.name)?;
        require("window_type.version", &window_type.version)?;
        for field in &window_type.metadata_fields {
            require("metadata_fields.name", &field.name)?;
        }

        for dependency in &algorithm.dependencies {
            require("dependencies.name", &dependency.name)?;
            require("dependencies.version", &dependency.version)?;
            require("dependencies.processor_name", &dependency.processor_name)?;
            require("dependencies.processor_runtime", &dependency.processor_runtime)?;
        }
    }

    Ok(())
}

/// Schema validation of an emitted window.
pub fn validate_window(window: &proto::Window) -> Result<(), CoreError> {
    require("window_type_name", &window.window_type_name)?;
    require("window_type_version", &window.window_type_version)?;
    require("origin", &window.origin)?;

    let time_from = window.time_from.as_ref().ok_or_else(|| CoreError::Validation {
        field: "time_from".to_string(),
        message: "is required".to_string(),
    })?;
    let time_to = window.time_to.as_ref().ok_or_else(|| CoreError::Validation {
        field: "time_to".to_string(),
        message: "is required".to_string(),
    })?;

    if (time_from.seconds, time_from.nanos) > (time_to.seconds, time_to.nanos) {
        return Err(CoreError::Validation {
            field: "time_from".to_string(),
            message: "must not be after time_to".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_window() -> proto::Window {
        proto::Window {
            window_type_name: "Telemetry".to_string(),
            window_type_version: "1.0.0".to_string(),
            time_from: Some(prost_types::Timestamp { seconds: 0, nanos: 0 }),
            time_to: Some(prost_types::Timestamp { seconds: 60, nanos: 0 }),
            origin: "test".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_validate_window_accepts_well_formed() {
        assert!(validate_window(&valid_window()).is_ok());
    }

    #[test]
    fn test_validate_window_rejects_missing_fields() {
        let mut window = valid_window();
        window.window_type_name.clear();
        assert!(validate_window(&window).is_err());

        let mut window = valid_window();
        window.time_to = None;
        assert!(validate_window(&window).is_err());
    }

    #[test]
    fn test_validate_window_rejects_inverted_bounds() {
        let mut window = valid_window();
        window.time_from = Some(prost_types::Timestamp { seconds: 120, nanos: 0 });
        let err = validate_window(&window).unwrap_err();
        assert!(err.to_string().contains("must not be after"));
    }

    #[test]
    fn test_validate_registration_checks_dependencies() {
        let registration = proto::ProcessorRegistration {
            name: "p1".to_string(),
            runtime: "python".to_string(),
            connection_str: "localhost:4041".to_string(),
            project_name: String::new(),
            supported_algorithms: vec![proto::Algorithm {
                name: "a1".to_string(),
                version: "1.0.0".to_string(),
                window_type: Some(proto::WindowType {
                    name: "Telemetry".to_string(),
                    version: "1.0.0".to_string(),
                    description: String::new(),
                    metadata_fields: Vec::new(),
                }),
                result_type: proto::ResultType::Value as i32,
                description: String::new(),
                dependencies: vec![proto::AlgorithmDependency {
                    name: "a0".to_string(),
                    version: "1.0.0".to_string(),
                    processor_name: String::new(),
                    processor_runtime: "python".to_string(),
                    lookback: None,
                }],
            }],
        };

        let err = validate_registration(&registration).unwrap_err();
        assert!(err.to_string().contains("dependencies.processor_name"));
    }
}
