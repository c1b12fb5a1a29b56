// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`LogsApi`] over the CloudWatch Logs JSON protocol.
//!
//! Every call is a `POST /` with an `X-Amz-Target: Logs_20140328.<Operation>`
//! header and an `application/x-amz-json-1.1` body. Errors come back as a
//! JSON document whose `__type` names the exception, which is what the
//! classification below keys on.
//!
//! Request signing is delegated to a [`SignRequest`] implementation so that
//! credential and role resolution stay outside this crate.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{LogsApi, PutLogEventsRequest, PutLogEventsResponse};
use crate::config::Config;
use crate::constants;
use crate::errors::{ApiError, ConfigError};
use crate::http::build_client;
use crate::record::Destination;

/// Adds authentication to an outgoing request right before it is sent.
#[async_trait]
pub trait SignRequest: Debug + Send + Sync {
    async fn sign(&self, request: &mut reqwest::Request) -> Result<(), ApiError>;
}

/// Sends requests as they are. Useful against local emulators and proxies
/// that sign on the way out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsigned;

#[async_trait]
impl SignRequest for Unsigned {
    async fn sign(&self, _request: &mut reqwest::Request) -> Result<(), ApiError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    client: reqwest::Client,
    endpoint: String,
    signer: Arc<dyn SignRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStream {
    log_stream_name: String,
    #[serde(default)]
    upload_sequence_token: Option<String>,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
    #[serde(rename = "expectedSequenceToken", default)]
    expected_sequence_token: Option<String>,
}

impl CloudWatchLogsClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        signer: Arc<dyn SignRequest>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            signer,
        }
    }

    /// Builds a client for the configured endpoint, request timeout and
    /// proxy.
    pub fn from_config(config: &Config, signer: Arc<dyn SignRequest>) -> Result<Self, ConfigError> {
        let client = build_client(config.request_timeout(), config.https_proxy.as_deref())
            .map_err(|_| ConfigError::InvalidValue {
                key: "https_proxy",
                value: config.https_proxy.clone().unwrap_or_default(),
            })?;
        Ok(Self::new(client, config.endpoint(), signer))
    }

    /// Public regional endpoint of the service.
    #[must_use]
    pub fn regional_endpoint(region: &str) -> String {
        format!("https://logs.{region}.amazonaws.com")
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T, R>(&self, operation: &str, body: &T) -> Result<R, ApiError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| ApiError::Rejected {
            kind: "SerializationError".to_string(),
            message: e.to_string(),
        })?;
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(
                "X-Amz-Target",
                format!("{}.{operation}", constants::TARGET_PREFIX),
            )
            .header(CONTENT_TYPE, constants::CONTENT_TYPE)
            .body(payload)
            .build()
            .map_err(transport_error)?;
        self.signer.sign(&mut request).await?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            let error = classify_error(status, &bytes);
            debug!("{} failed with {}: {}", operation, status, error);
            return Err(error);
        }

        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::Transient(format!("invalid {operation} response: {e}")))
    }
}

#[async_trait]
impl LogsApi for CloudWatchLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), ApiError> {
        let _: Empty = self
            .call(
                "CreateLogGroup",
                &CreateLogGroupRequest {
                    log_group_name: group,
                },
            )
            .await?;
        Ok(())
    }

    async fn create_log_stream(&self, destination: &Destination) -> Result<(), ApiError> {
        let _: Empty = self
            .call(
                "CreateLogStream",
                &CreateLogStreamRequest {
                    log_group_name: &destination.group,
                    log_stream_name: &destination.stream,
                },
            )
            .await?;
        Ok(())
    }

    async fn upload_sequence_token(
        &self,
        destination: &Destination,
    ) -> Result<Option<String>, ApiError> {
        let response: DescribeLogStreamsResponse = self
            .call(
                "DescribeLogStreams",
                &DescribeLogStreamsRequest {
                    log_group_name: &destination.group,
                    log_stream_name_prefix: &destination.stream,
                },
            )
            .await?;
        response
            .log_streams
            .into_iter()
            .find(|stream| stream.log_stream_name == destination.stream)
            .map(|stream| stream.upload_sequence_token)
            .ok_or_else(|| ApiError::ResourceNotFound(format!("log stream {destination}")))
    }

    async fn put_log_events(
        &self,
        request: &PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ApiError> {
        self.call("PutLogEvents", request).await
    }
}

fn transport_error(error: reqwest::Error) -> ApiError {
    ApiError::Transient(error.to_string())
}

/// Maps an error response onto the engine's failure classes.
fn classify_error(status: StatusCode, body: &[u8]) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    // The type may be qualified, e.g. "com.amazonaws.logs#ThrottlingException".
    let kind = parsed
        .kind
        .as_deref()
        .and_then(|kind| kind.rsplit('#').next())
        .unwrap_or_default()
        .to_string();
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    match kind.as_str() {
        "InvalidSequenceTokenException" => ApiError::InvalidSequenceToken {
            expected: parsed
                .expected_sequence_token
                .or_else(|| token_from_message(&message)),
        },
        "DataAlreadyAcceptedException" => ApiError::DataAlreadyAccepted {
            expected: parsed
                .expected_sequence_token
                .or_else(|| token_from_message(&message)),
        },
        "ResourceAlreadyExistsException" => ApiError::ResourceAlreadyExists(message),
        "ResourceNotFoundException" => ApiError::ResourceNotFound(message),
        "ThrottlingException" => ApiError::Throttled(message),
        "ServiceUnavailableException" => ApiError::Transient(message),
        _ if status == StatusCode::TOO_MANY_REQUESTS => ApiError::Throttled(message),
        _ if status.is_server_error() => ApiError::Transient(message),
        _ => ApiError::Rejected {
            kind: if kind.is_empty() {
                status.to_string()
            } else {
                kind
            },
            message,
        },
    }
}

/// Older service versions only quote the expected token at the end of the
/// message: "... The next expected sequenceToken is: 4960..."
fn token_from_message(message: &str) -> Option<String> {
    let (_, tail) = message.rsplit_once("sequenceToken is:")?;
    let token = tail.split_whitespace().next()?;
    if token == "null" {
        return None;
    }
    Some(token.to_string())
}
