// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{LogsApi, PutLogEventsRequest, PutLogEventsResponse};
use crate::errors::ApiError;
use crate::record::Destination;

/// In-memory [`LogsApi`] answering from queued responses.
///
/// Once a queue runs dry the call succeeds; accepted appends return the
/// token `"t<n>"` where n counts PutLogEvents calls.
#[derive(Debug, Default)]
pub(crate) struct ScriptedApi {
    put_responses: Mutex<VecDeque<Result<PutLogEventsResponse, ApiError>>>,
    stream_responses: Mutex<VecDeque<Result<(), ApiError>>>,
    group_responses: Mutex<VecDeque<Result<(), ApiError>>>,
    upload_token: Mutex<Option<Result<Option<String>, ApiError>>>,
    put_requests: Mutex<Vec<PutLogEventsRequest>>,
    create_stream_delay: Option<Duration>,
    pub create_group_calls: AtomicUsize,
    pub create_stream_calls: AtomicUsize,
    pub describe_calls: AtomicUsize,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes CreateLogStream slow enough for concurrent callers to overlap.
    pub(crate) fn with_create_stream_delay(mut self, delay: Duration) -> Self {
        self.create_stream_delay = Some(delay);
        self
    }

    pub(crate) fn push_put(&self, response: Result<PutLogEventsResponse, ApiError>) {
        self.put_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_put_error(&self, error: ApiError) {
        self.push_put(Err(error));
    }

    pub(crate) fn push_stream(&self, response: Result<(), ApiError>) {
        self.stream_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_group(&self, response: Result<(), ApiError>) {
        self.group_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn set_upload_token(&self, response: Result<Option<String>, ApiError>) {
        *self.upload_token.lock().unwrap() = Some(response);
    }

    pub(crate) fn put_requests(&self) -> Vec<PutLogEventsRequest> {
        self.put_requests.lock().unwrap().clone()
    }

    pub(crate) fn create_stream_calls(&self) -> usize {
        self.create_stream_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn create_group_calls(&self) -> usize {
        self.create_group_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogsApi for ScriptedApi {
    async fn create_log_group(&self, _group: &str) -> Result<(), ApiError> {
        self.create_group_calls.fetch_add(1, Ordering::SeqCst);
        self.group_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn create_log_stream(&self, _destination: &Destination) -> Result<(), ApiError> {
        self.create_stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.create_stream_delay {
            tokio::time::sleep(delay).await;
        }
        self.stream_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn upload_sequence_token(
        &self,
        _destination: &Destination,
    ) -> Result<Option<String>, ApiError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.upload_token.lock().unwrap().clone().unwrap_or(Ok(None))
    }

    async fn put_log_events(
        &self,
        request: &PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ApiError> {
        let calls = {
            let mut requests = self.put_requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        self.put_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PutLogEventsResponse {
                    next_sequence_token: Some(format!("t{calls}")),
                    rejected_log_events_info: None,
                })
            })
    }
}
