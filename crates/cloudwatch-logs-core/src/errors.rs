// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::Destination;

/// Invalid or incomplete configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration key '{0}'")]
    MissingKey(&'static str),
    #[error("one of 'log_stream_name' or 'log_stream_prefix' is required")]
    MissingStreamNaming,
    #[error("'log_stream_name' and 'log_stream_prefix' cannot be configured together")]
    ConflictingStreamNaming,
    #[error("invalid boolean for '{key}': '{value}'")]
    InvalidBool { key: &'static str, value: String },
    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid name template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("invalid batch limits: {0}")]
    InvalidLimits(String),
    #[error("no AWS credentials provider is available")]
    MissingCredentials,
}

/// A single record could not be queued. The record is dropped; retrying it
/// unchanged would fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record of {size} bytes for {destination} exceeds the {max} byte event limit")]
    Oversize {
        destination: Destination,
        size: usize,
        max: usize,
    },
    #[error("record timestamp {timestamp} for {destination} is older than the accepted floor {floor}")]
    OutOfOrder {
        destination: Destination,
        timestamp: i64,
        floor: i64,
    },
}

/// Failure reported by the logs service or the transport in front of it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("invalid sequence token, service expects {expected:?}")]
    InvalidSequenceToken { expected: Option<String> },
    #[error("batch was already accepted, service expects {expected:?}")]
    DataAlreadyAccepted { expected: Option<String> },
    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{kind}: {message}")]
    Rejected { kind: String, message: String },
}

impl ApiError {
    /// Whether resubmitting the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSequenceToken { .. } | Self::Throttled(_) | Self::Transient(_)
        )
    }
}

/// A tag could not be turned into an existing destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("tag '{tag}' has no part {index} required by template '{template}'")]
    TagPartOutOfRange {
        tag: String,
        template: String,
        index: usize,
    },
    #[error("invalid log {kind} name '{name}' for tag '{tag}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        tag: String,
        reason: &'static str,
    },
    #[error("log group '{group}' does not exist and auto_create_group is disabled")]
    GroupMissing { group: String },
    #[error("failed to ensure {destination} exists: {source}")]
    Api {
        destination: Destination,
        #[source]
        source: ApiError,
    },
}

impl ResolveError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Error returned by the engine's host-facing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl EngineError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Record(_) => false,
            Self::Resolve(e) => e.is_retryable(),
        }
    }
}
