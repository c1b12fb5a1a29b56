// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The logs service as seen by the engine.
//!
//! [`LogsApi`] is the seam between the engine and the network. The
//! production implementation is [`crate::cloudwatch::CloudWatchLogsClient`];
//! tests drive the engine with scripted implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::errors::ApiError;
use crate::record::Destination;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputLogEvent {
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub log_events: Vec<InputLogEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_token: Option<String>,
}

impl PutLogEventsRequest {
    /// Builds a request carrying the batch's events in timestamp order.
    #[must_use]
    pub fn from_batch(batch: &Batch, sequence_token: Option<&str>) -> Self {
        let destination = batch.destination();
        Self {
            log_group_name: destination.group.clone(),
            log_stream_name: destination.stream.clone(),
            log_events: batch
                .records()
                .iter()
                .map(|record| InputLogEvent {
                    timestamp: record.timestamp(),
                    message: record.message().to_string(),
                })
                .collect(),
            sequence_token: sequence_token.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsResponse {
    #[serde(default)]
    pub next_sequence_token: Option<String>,
    #[serde(default)]
    pub rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

/// Events of an accepted batch that the service nevertheless dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLogEventsInfo {
    #[serde(default)]
    pub too_new_log_event_start_index: Option<usize>,
    #[serde(default)]
    pub too_old_log_event_end_index: Option<usize>,
    #[serde(default)]
    pub expired_log_event_end_index: Option<usize>,
}

#[async_trait]
pub trait LogsApi: Send + Sync {
    /// Creates a log group. Fails with [`ApiError::ResourceAlreadyExists`]
    /// when it is already there.
    async fn create_log_group(&self, group: &str) -> Result<(), ApiError>;

    /// Creates a log stream. Fails with [`ApiError::ResourceNotFound`] when
    /// the group is missing and [`ApiError::ResourceAlreadyExists`] when the
    /// stream is already there.
    async fn create_log_stream(&self, destination: &Destination) -> Result<(), ApiError>;

    /// Reads the stream's current upload sequence token from its metadata.
    async fn upload_sequence_token(
        &self,
        destination: &Destination,
    ) -> Result<Option<String>, ApiError>;

    async fn put_log_events(
        &self,
        request: &PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ApiError>;
}
