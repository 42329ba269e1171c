// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store interfaces and record types for orca-core.
//!
//! This module defines the typed records read from and written to the store;
//! the queries themselves live in [`postgres`].

pub mod postgres;

use chrono::{DateTime, Utc};

use orca_protocol::proto;

/// Shape of the value an algorithm produces, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "result_type", rename_all = "lowercase")]
pub enum ResultType {
    /// A single float value.
    Value,
    /// A JSON struct.
    Struct,
    /// An array of floats.
    Array,
    /// No value; the algorithm runs for its side effects.
    None,
}

impl ResultType {
    /// Map a wire result type onto its stored form. `NOT_SPECIFIED` has no
    /// stored form and is rejected at registration.
    pub fn from_proto(result_type: proto::ResultType) -> Option<Self> {
        match result_type {
            proto::ResultType::Value => Some(Self::Value),
            proto::ResultType::Struct => Some(Self::Struct),
            proto::ResultType::Array => Some(Self::Array),
            proto::ResultType::None => Some(Self::None),
            proto::ResultType::NotSpecified => None,
        }
    }

    /// Map a stored result type onto its wire form.
    pub fn to_proto(self) -> proto::ResultType {
        match self {
            Self::Value => proto::ResultType::Value,
            Self::Struct => proto::ResultType::Struct,
            Self::Array => proto::ResultType::Array,
            Self::None => proto::ResultType::None,
        }
    }
}

/// Processor record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessorRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Processor name; unique together with the runtime.
    pub name: String,
    /// Processor runtime.
    pub runtime: String,
    /// Network address of the remote worker.
    pub connection_string: String,
    /// Optional project the processor belongs to. Stored, never read by the
    /// core.
    pub project_name: Option<String>,
}

/// Window type record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WindowTypeRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Window type name; unique together with the version.
    pub name: String,
    /// Window type version.
    pub version: String,
    /// Human-readable description.
    pub description: String,
}

/// Metadata field record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetadataFieldRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Field name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// Metadata field together with the window type it is linked to.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WindowTypeFieldLink {
    /// The linked window type id.
    pub window_type_id: i64,
    /// Field name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// Algorithm record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlgorithmRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Algorithm name.
    pub name: String,
    /// Algorithm version.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Owning processor id.
    pub processor_id: i64,
    /// Window type the algorithm is bound to.
    pub window_type_id: i64,
    /// Shape of the value the algorithm produces.
    pub result_type: ResultType,
}

/// Parameters for creating or refreshing an algorithm row.
#[derive(Debug, Clone)]
pub struct NewAlgorithm<'a> {
    /// Algorithm name.
    pub name: &'a str,
    /// Algorithm version.
    pub version: &'a str,
    /// Human-readable description.
    pub description: &'a str,
    /// Owning processor name.
    pub processor_name: &'a str,
    /// Owning processor runtime.
    pub processor_runtime: &'a str,
    /// Name of the window type the algorithm is bound to.
    pub window_type_name: &'a str,
    /// Version of the window type the algorithm is bound to.
    pub window_type_version: &'a str,
    /// Shape of the value the algorithm produces.
    pub result_type: ResultType,
}

/// A maximal dependency chain ending at a given algorithm, as three parallel
/// dot-joined id strings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlgorithmPathRecord {
    /// Dot-joined algorithm ids along the chain, root first.
    pub algo_id_path: String,
    /// Dot-joined window type ids, parallel to `algo_id_path`.
    pub window_type_id_path: String,
    /// Dot-joined processor ids, parallel to `algo_id_path`.
    pub proc_id_path: String,
}

/// A maximal dependency chain rooted at a window type, with per-edge lookback
/// settings. All five strings have the same segment count; the lookback
/// segments are `0` where the node has no incoming edge or the edge requests
/// no lookback.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionPathRecord {
    /// Dot-joined algorithm ids along the chain, root first.
    pub algo_id_path: String,
    /// Dot-joined window type ids, parallel to `algo_id_path`.
    pub window_type_id_path: String,
    /// Dot-joined processor ids, parallel to `algo_id_path`.
    pub proc_id_path: String,
    /// Dot-joined count lookbacks of each node's incoming edge.
    pub lookback_count_path: String,
    /// Dot-joined timedelta lookbacks (seconds) of each node's incoming edge.
    pub lookback_timedelta_path: String,
}

/// Identity of a freshly inserted window.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct InsertedWindow {
    /// Store-assigned window id.
    pub id: i64,
    /// Resolved window type id.
    pub window_type_id: i64,
}

/// A persisted result together with the time bounds of its window.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredResult {
    /// Store-assigned result id.
    pub id: i64,
    /// The window this result belongs to.
    pub window_id: i64,
    /// Single float value, when the algorithm's result type is VALUE.
    pub result_value: Option<f64>,
    /// Float array, when the algorithm's result type is ARRAY.
    pub result_array: Option<Vec<f64>>,
    /// JSON struct, when the algorithm's result type is STRUCT.
    pub result_json: Option<serde_json::Value>,
    /// Start of the owning window.
    pub time_from: DateTime<Utc>,
    /// End of the owning window.
    pub time_to: DateTime<Utc>,
}
