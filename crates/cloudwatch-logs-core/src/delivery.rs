// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! PutLogEvents for a single batch, with sequence token bookkeeping.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{LogsApi, PutLogEventsRequest, PutLogEventsResponse};
use crate::batch::Batch;
use crate::errors::ApiError;
use crate::sequencer::StreamSequencer;

/// How one delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub accepted: bool,
    /// Only meaningful when not accepted.
    pub retryable: bool,
    /// Token the sequencer holds after the attempt.
    pub updated_sequence_token: Option<String>,
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    fn accepted(token: Option<String>) -> Self {
        Self {
            accepted: true,
            retryable: false,
            updated_sequence_token: token,
            reason: None,
        }
    }

    fn failed(error: &ApiError, token: Option<String>) -> Self {
        Self {
            accepted: false,
            retryable: error.is_retryable(),
            updated_sequence_token: token,
            reason: Some(error.to_string()),
        }
    }

    /// Failed and worth resubmitting later.
    #[must_use]
    pub fn is_retryable_failure(&self) -> bool {
        !self.accepted && self.retryable
    }
}

#[derive(Clone)]
pub struct DeliveryClient {
    api: Arc<dyn LogsApi>,
}

impl DeliveryClient {
    pub fn new(api: Arc<dyn LogsApi>) -> Self {
        Self { api }
    }

    /// Appends `batch` to its stream using the sequencer's token.
    ///
    /// A stale token is refreshed, from the error itself when the service
    /// names the expected token and from the stream's metadata otherwise,
    /// and the append is retried once. The sequencer is written at most once
    /// per call.
    pub async fn deliver(&self, sequencer: &mut StreamSequencer, batch: &Batch) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::accepted(sequencer.current_token().map(str::to_string));
        }

        let request = PutLogEventsRequest::from_batch(batch, sequencer.current_token());
        debug!(
            "Sending {} events ({} bytes) to {}",
            batch.len(),
            batch.size_bytes(),
            batch.destination()
        );
        let result = self.api.put_log_events(&request).await;
        match result {
            Ok(response) => accept(sequencer, batch, response),
            Err(ApiError::DataAlreadyAccepted { expected }) => {
                already_accepted(sequencer, batch, expected)
            }
            Err(ApiError::InvalidSequenceToken { expected }) => {
                self.retry_with_fresh_token(sequencer, batch, request, expected)
                    .await
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Retryable failure sending to {}: {}", batch.destination(), e);
                } else {
                    warn!("Batch for {} rejected: {}", batch.destination(), e);
                }
                DeliveryOutcome::failed(&e, sequencer.current_token().map(str::to_string))
            }
        }
    }

    async fn retry_with_fresh_token(
        &self,
        sequencer: &mut StreamSequencer,
        batch: &Batch,
        mut request: PutLogEventsRequest,
        expected: Option<String>,
    ) -> DeliveryOutcome {
        let token = match expected {
            Some(token) => Some(token),
            None => match self.api.upload_sequence_token(sequencer.destination()).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(
                        "Failed to refresh sequence token for {}: {}",
                        batch.destination(),
                        e
                    );
                    let error = if e.is_retryable() {
                        ApiError::InvalidSequenceToken { expected: None }
                    } else {
                        e
                    };
                    return DeliveryOutcome::failed(
                        &error,
                        sequencer.current_token().map(str::to_string),
                    );
                }
            },
        };
        debug!(
            "Sequence token for {} was stale, retrying with {:?}",
            batch.destination(),
            token
        );

        request.sequence_token.clone_from(&token);
        match self.api.put_log_events(&request).await {
            Ok(response) => accept(sequencer, batch, response),
            Err(ApiError::DataAlreadyAccepted { expected }) => {
                already_accepted(sequencer, batch, expected)
            }
            Err(ApiError::InvalidSequenceToken { expected }) => {
                let token = expected.or(token);
                warn!(
                    "Sequence token for {} still stale after refresh",
                    batch.destination()
                );
                sequencer.update(token.clone());
                DeliveryOutcome::failed(&ApiError::InvalidSequenceToken { expected: None }, token)
            }
            Err(e) => {
                warn!(
                    "Retry with refreshed token for {} failed: {}",
                    batch.destination(),
                    e
                );
                sequencer.update(token.clone());
                DeliveryOutcome::failed(&e, token)
            }
        }
    }
}

fn accept(
    sequencer: &mut StreamSequencer,
    batch: &Batch,
    response: PutLogEventsResponse,
) -> DeliveryOutcome {
    if let Some(info) = response.rejected_log_events_info {
        warn!(
            "{} accepted a batch of {} events but dropped some: too new from index {:?}, \
             too old up to index {:?}, expired up to index {:?}",
            batch.destination(),
            batch.len(),
            info.too_new_log_event_start_index,
            info.too_old_log_event_end_index,
            info.expired_log_event_end_index
        );
    }
    sequencer.update(response.next_sequence_token.clone());
    DeliveryOutcome::accepted(response.next_sequence_token)
}

fn already_accepted(
    sequencer: &mut StreamSequencer,
    batch: &Batch,
    expected: Option<String>,
) -> DeliveryOutcome {
    debug!(
        "Batch of {} events for {} was already accepted",
        batch.len(),
        batch.destination()
    );
    sequencer.update(expected.clone());
    DeliveryOutcome::accepted(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RejectedLogEventsInfo;
    use crate::record::{Destination, LogRecord};
    use crate::test_support::ScriptedApi;
    use tracing_test::traced_test;

    fn destination() -> Destination {
        Destination::new("group", "stream")
    }

    fn batch() -> Batch {
        let mut batch = Batch::new(destination());
        batch.push(LogRecord::new("app", 1, "one"));
        batch.push(LogRecord::new("app", 2, "two"));
        batch
    }

    fn client(api: &Arc<ScriptedApi>) -> DeliveryClient {
        DeliveryClient::new(api.clone())
    }

    #[tokio::test]
    async fn test_success_updates_token() {
        let api = Arc::new(ScriptedApi::new());
        let mut sequencer = StreamSequencer::with_token(destination(), "t0");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.accepted);
        assert_eq!(outcome.updated_sequence_token.as_deref(), Some("t1"));
        assert_eq!(sequencer.current_token(), Some("t1"));
        let requests = api.put_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sequence_token.as_deref(), Some("t0"));
        assert_eq!(requests[0].log_events.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let api = Arc::new(ScriptedApi::new());
        let mut sequencer = StreamSequencer::new(destination());

        let outcome = client(&api)
            .deliver(&mut sequencer, &Batch::new(destination()))
            .await;

        assert!(outcome.accepted);
        assert!(api.put_requests().is_empty());
    }

    #[tokio::test]
    async fn test_stale_token_with_expected_token_retries_once() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::InvalidSequenceToken {
            expected: Some("fresh".to_string()),
        });
        let mut sequencer = StreamSequencer::with_token(destination(), "stale");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.accepted);
        assert_eq!(sequencer.current_token(), Some("t2"));
        assert_eq!(sequencer.update_count(), 1);
        assert_eq!(api.describe_calls(), 0);
        let requests = api.put_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].sequence_token.as_deref(), Some("fresh"));
        assert_eq!(requests[0].log_events, requests[1].log_events);
    }

    #[tokio::test]
    async fn test_stale_token_without_expected_token_describes_stream() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::InvalidSequenceToken { expected: None });
        api.set_upload_token(Ok(Some("described".to_string())));
        let mut sequencer = StreamSequencer::with_token(destination(), "stale");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.accepted);
        assert_eq!(api.describe_calls(), 1);
        assert_eq!(
            api.put_requests()[1].sequence_token.as_deref(),
            Some("described")
        );
        assert_eq!(sequencer.update_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_twice_is_retryable_and_keeps_refreshed_token() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::InvalidSequenceToken {
            expected: Some("first".to_string()),
        });
        api.push_put_error(ApiError::InvalidSequenceToken {
            expected: Some("second".to_string()),
        });
        let mut sequencer = StreamSequencer::with_token(destination(), "stale");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.is_retryable_failure());
        assert_eq!(sequencer.current_token(), Some("second"));
        assert_eq!(api.put_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_then_throttled_is_retryable() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::InvalidSequenceToken {
            expected: Some("fresh".to_string()),
        });
        api.push_put_error(ApiError::Throttled("slow down".to_string()));
        let mut sequencer = StreamSequencer::with_token(destination(), "stale");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.is_retryable_failure());
        assert_eq!(sequencer.current_token(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_throttled_is_retryable_without_refresh() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Throttled("Rate exceeded".to_string()));
        let mut sequencer = StreamSequencer::with_token(destination(), "t0");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(!outcome.accepted);
        assert!(outcome.retryable);
        assert_eq!(sequencer.current_token(), Some("t0"));
        assert_eq!(sequencer.update_count(), 0);
        assert_eq!(api.describe_calls(), 0);
        assert_eq!(api.put_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_is_fatal() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Rejected {
            kind: "InvalidParameterException".to_string(),
            message: "log events too old".to_string(),
        });
        let mut sequencer = StreamSequencer::new(destination());

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(!outcome.accepted);
        assert!(!outcome.retryable);
        assert!(outcome.reason.unwrap().contains("log events too old"));
    }

    #[tokio::test]
    async fn test_stream_deleted_is_fatal() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::ResourceNotFound("stream".to_string()));
        let mut sequencer = StreamSequencer::new(destination());

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(!outcome.accepted);
        assert!(!outcome.retryable);
    }

    #[tokio::test]
    async fn test_data_already_accepted_counts_as_delivered() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::DataAlreadyAccepted {
            expected: Some("next".to_string()),
        });
        let mut sequencer = StreamSequencer::with_token(destination(), "t0");

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.accepted);
        assert_eq!(sequencer.current_token(), Some("next"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_partially_rejected_events_are_logged() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put(Ok(PutLogEventsResponse {
            next_sequence_token: Some("t9".to_string()),
            rejected_log_events_info: Some(RejectedLogEventsInfo {
                too_old_log_event_end_index: Some(0),
                ..Default::default()
            }),
        }));
        let mut sequencer = StreamSequencer::new(destination());

        let outcome = client(&api).deliver(&mut sequencer, &batch()).await;

        assert!(outcome.accepted);
        assert_eq!(sequencer.current_token(), Some("t9"));
        assert!(logs_contain("dropped some"));
    }
}
