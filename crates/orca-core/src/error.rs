// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for orca-core.
//!
//! Provides a unified error type that maps to gRPC status responses.

use std::fmt;

use crate::plan::PlanError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during registration, window emission and plan
/// execution.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A window type was re-registered with a different metadata field set.
    WindowTypeMetadataChanged {
        /// The window type name.
        window_type_name: String,
        /// The window type version.
        window_type_version: String,
        /// Field names stored for this window type version.
        stored: Vec<String>,
        /// Field names presented by the incoming registration.
        incoming: Vec<String>,
    },

    /// A declared dependency would close a cycle in the algorithm graph.
    CircularDependency {
        /// Name of the upstream (depended-on) algorithm.
        from_name: String,
        /// Version of the upstream algorithm.
        from_version: String,
        /// Processor owning the upstream algorithm.
        from_processor: String,
        /// Name of the dependent algorithm.
        to_name: String,
        /// Version of the dependent algorithm.
        to_version: String,
        /// Processor owning the dependent algorithm.
        to_processor: String,
    },

    /// A window was emitted for a window type that is not registered.
    WindowTypeMissing {
        /// The window type name.
        window_type_name: String,
        /// The window type version.
        window_type_version: String,
    },

    /// An emitted window is missing a metadata field its type requires.
    MetadataFieldMissing {
        /// The missing field name.
        field_name: String,
        /// The window type name.
        window_type_name: String,
        /// The window type version.
        window_type_version: String,
    },

    /// An algorithm could not be resolved by its full identity.
    AlgorithmNotFound {
        /// The algorithm name.
        name: String,
        /// The algorithm version.
        version: String,
        /// The owning processor name.
        processor_name: String,
        /// The owning processor runtime.
        processor_runtime: String,
    },

    /// A plan node references an algorithm id not fetched for the window.
    AlgorithmIdNotFound {
        /// The unresolved algorithm id.
        algorithm_id: i64,
    },

    /// A streamed result references an algorithm not bound to the emitted
    /// window's type.
    UnknownResultAlgorithm {
        /// The reported algorithm name.
        name: String,
        /// The reported algorithm version.
        version: String,
    },

    /// A plan task references a processor id not present in the store.
    ProcessorNotFound {
        /// The unresolved processor id.
        processor_id: i64,
    },

    /// A processor could not be dialed or answered the health check with an
    /// error.
    ProcessorUnreachable {
        /// The processor name.
        processor: String,
        /// Error details.
        details: String,
    },

    /// A processor answered the health check with a non-serving status.
    ProcessorNotServing {
        /// The processor name.
        processor: String,
        /// The reported status.
        status: String,
    },

    /// The result stream from a processor failed mid-task.
    ExecutionStream {
        /// The processor name.
        processor: String,
        /// Error details.
        details: String,
    },

    /// The execution plan could not be built from the stored paths.
    PlanBuild(PlanError),

    /// Store operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::WindowTypeMetadataChanged { .. } => "WINDOW_TYPE_METADATA_CHANGED",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::WindowTypeMissing { .. } => "WINDOW_TYPE_MISSING",
            Self::MetadataFieldMissing { .. } => "METADATA_FIELD_MISSING",
            Self::AlgorithmNotFound { .. } => "ALGORITHM_NOT_FOUND",
            Self::AlgorithmIdNotFound { .. } => "ALGORITHM_ID_NOT_FOUND",
            Self::UnknownResultAlgorithm { .. } => "UNKNOWN_RESULT_ALGORITHM",
            Self::ProcessorNotFound { .. } => "PROCESSOR_NOT_FOUND",
            Self::ProcessorUnreachable { .. } => "PROCESSOR_UNREACHABLE",
            Self::ProcessorNotServing { .. } => "PROCESSOR_NOT_SERVING",
            Self::ExecutionStream { .. } => "EXECUTION_STREAM_ERROR",
            Self::PlanBuild(_) => "PLAN_BUILD_FAILED",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether an EmitWindow call should report this error as
    /// `TRIGGERING_FAILED` rather than a transport-level status.
    pub fn is_triggering_failure(&self) -> bool {
        matches!(
            self,
            Self::WindowTypeMissing { .. }
                | Self::MetadataFieldMissing { .. }
                | Self::PlanBuild(_)
        )
    }

    /// Convert this error to a gRPC status for protocol responses.
    ///
    /// User-caused errors surface verbatim as `invalid_argument` or
    /// `failed_precondition`; infrastructure errors surface as `internal`.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            Self::Validation { .. } | Self::MetadataFieldMissing { .. } => {
                tonic::Status::invalid_argument(self.to_string())
            }
            Self::WindowTypeMetadataChanged { .. }
            | Self::CircularDependency { .. }
            | Self::WindowTypeMissing { .. } => tonic::Status::failed_precondition(self.to_string()),
            _ => tonic::Status::internal(self.to_string()),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::WindowTypeMetadataChanged {
                window_type_name,
                window_type_version,
                stored,
                incoming,
            } => {
                write!(
                    f,
                    "Metadata fields of window type '{}' (version {}) do not match the fields \
                     registered for it: expected [{}], got [{}]. Consider bumping the version \
                     of the window type.",
                    window_type_name,
                    window_type_version,
                    stored.join(", "),
                    incoming.join(", ")
                )
            }
            Self::CircularDependency {
                from_name,
                from_version,
                from_processor,
                to_name,
                to_version,
                to_processor,
            } => {
                write!(
                    f,
                    "Circular dependency introduced between algorithm {} to {}, with versions \
                     {} and {}, of processor(s) {} and {} respectively.",
                    from_name, to_name, from_version, to_version, from_processor, to_processor
                )
            }
            Self::WindowTypeMissing {
                window_type_name,
                window_type_version,
            } => {
                write!(
                    f,
                    "Window type '{}' (version {}) does not exist - register it via processor \
                     registration first",
                    window_type_name, window_type_version
                )
            }
            Self::MetadataFieldMissing {
                field_name,
                window_type_name,
                window_type_version,
            } => {
                write!(
                    f,
                    "Required metadata field '{}' of window type '{}' (version {}) is missing",
                    field_name, window_type_name, window_type_version
                )
            }
            Self::AlgorithmNotFound {
                name,
                version,
                processor_name,
                processor_runtime,
            } => {
                write!(
                    f,
                    "Algorithm '{}' (version {}) is not registered under processor '{}' ({})",
                    name, version, processor_name, processor_runtime
                )
            }
            Self::AlgorithmIdNotFound { algorithm_id } => {
                write!(f, "Algorithm ID {} not found", algorithm_id)
            }
            Self::UnknownResultAlgorithm { name, version } => {
                write!(
                    f,
                    "Streamed result references unknown algorithm '{}' (version {})",
                    name, version
                )
            }
            Self::ProcessorNotFound { processor_id } => {
                write!(f, "Processor ID {} not found", processor_id)
            }
            Self::ProcessorUnreachable { processor, details } => {
                write!(f, "Could not contact processor '{}': {}", processor, details)
            }
            Self::ProcessorNotServing { processor, status } => {
                write!(f, "Processor '{}' is not serving: {}", processor, status)
            }
            Self::ExecutionStream { processor, details } => {
                write!(
                    f,
                    "Error receiving execution results from processor '{}': {}",
                    processor, details
                )
            }
            Self::PlanBuild(err) => {
                write!(f, "Could not build execution plan: {}", err)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<PlanError> for CoreError {
    fn from(err: PlanError) -> Self {
        CoreError::PlanBuild(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases: Vec<(CoreError, &str)> = vec![
            (
                CoreError::Validation {
                    field: "name".to_string(),
                    message: "is required".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                CoreError::WindowTypeMissing {
                    window_type_name: "Telemetry".to_string(),
                    window_type_version: "1.0.0".to_string(),
                },
                "WINDOW_TYPE_MISSING",
            ),
            (
                CoreError::CircularDependency {
                    from_name: "A".to_string(),
                    from_version: "1".to_string(),
                    from_processor: "p1".to_string(),
                    to_name: "B".to_string(),
                    to_version: "1".to_string(),
                    to_processor: "p1".to_string(),
                },
                "CIRCULAR_DEPENDENCY",
            ),
            (
                CoreError::PlanBuild(PlanError::CycleDetected),
                "PLAN_BUILD_FAILED",
            ),
            (
                CoreError::Database {
                    operation: "insert".to_string(),
                    details: "connection refused".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(error.error_code(), expected_code, "for error {:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_circular_dependency_display() {
        let err = CoreError::CircularDependency {
            from_name: "Anomaly".to_string(),
            from_version: "1.0.0".to_string(),
            from_processor: "edge-1".to_string(),
            to_name: "Baseline".to_string(),
            to_version: "2.0.0".to_string(),
            to_processor: "edge-2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency introduced between algorithm Anomaly to Baseline, with \
             versions 1.0.0 and 2.0.0, of processor(s) edge-1 and edge-2 respectively."
        );
    }

    #[test]
    fn test_triggering_failure_classification() {
        let missing = CoreError::WindowTypeMissing {
            window_type_name: "Telemetry".to_string(),
            window_type_version: "1.0.0".to_string(),
        };
        assert!(missing.is_triggering_failure());

        let db = CoreError::Database {
            operation: "query".to_string(),
            details: "timeout".to_string(),
        };
        assert!(!db.is_triggering_failure());
    }

    #[test]
    fn test_status_mapping() {
        let changed = CoreError::WindowTypeMetadataChanged {
            window_type_name: "Telemetry".to_string(),
            window_type_version: "1.0.0".to_string(),
            stored: vec!["asset_id".to_string(), "fleet_id".to_string()],
            incoming: vec!["asset_id".to_string()],
        };
        let status = changed.to_status();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().contains("bumping the version"));

        let db = CoreError::Database {
            operation: "query".to_string(),
            details: "timeout".to_string(),
        };
        assert_eq!(db.to_status().code(), tonic::Code::Internal);
    }
}
