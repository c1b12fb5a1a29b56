// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host plugin lifecycle on top of the [`Engine`].
//!
//! The host hands over records already decoded from its native format into
//! [`HostRecord`]s and expects one of its three result codes back from every
//! flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::api::LogsApi;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::Engine;
use crate::errors::{ConfigError, EngineError};
use crate::flusher::FlushOutcome;
use crate::record::LogRecord;

pub const PLUGIN_NAME: &str = "cloudwatch";
pub const PLUGIN_DESCRIPTION: &str = "Ships records to AWS CloudWatch Logs";

/// Result codes understood by the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Unrecoverable, the host drops the data.
    Error = 0,
    Ok = 1,
    /// The host hands the same records over again later.
    Retry = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTimestamp {
    EpochSeconds(u64),
    Structured(DateTime<Utc>),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostBody {
    Map(Map<String, Value>),
    Scalar(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub timestamp: HostTimestamp,
    pub body: HostBody,
}

pub struct PluginAdapter {
    engine: Engine,
    log_key: Option<String>,
    // The host retries whole chunks, so a chunk's records must not share a
    // flush with another chunk's.
    flush_lock: tokio::sync::Mutex<()>,
    dropped: AtomicU64,
}

impl PluginAdapter {
    #[must_use]
    pub fn register() -> Registration {
        Registration {
            name: PLUGIN_NAME,
            description: PLUGIN_DESCRIPTION,
        }
    }

    pub fn init(config: Config, api: Arc<dyn LogsApi>) -> Result<Self, ConfigError> {
        Self::init_with_clock(config, api, Arc::new(SystemClock))
    }

    pub fn init_with_clock(
        config: Config,
        api: Arc<dyn LogsApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!("[{}] log_group_name = '{}'", PLUGIN_NAME, config.log_group_name);
        info!(
            "[{}] log_stream_name = '{}'",
            PLUGIN_NAME,
            config.log_stream_name.as_deref().unwrap_or_default()
        );
        info!(
            "[{}] log_stream_prefix = '{}'",
            PLUGIN_NAME,
            config.log_stream_prefix.as_deref().unwrap_or_default()
        );
        info!("[{}] region = '{}'", PLUGIN_NAME, config.region);
        info!(
            "[{}] log_key = '{}'",
            PLUGIN_NAME,
            config.log_key.as_deref().unwrap_or_default()
        );
        info!(
            "[{}] role_arn = '{}'",
            PLUGIN_NAME,
            config.role_arn.as_deref().unwrap_or_default()
        );
        info!(
            "[{}] auto_create_group = '{}'",
            PLUGIN_NAME, config.auto_create_group
        );

        let engine = Engine::new(config.engine_config()?, api, clock)?;
        Ok(Self {
            engine,
            log_key: config.log_key,
            flush_lock: tokio::sync::Mutex::new(()),
            dropped: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Records dropped so far because they could not be decoded or queued.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ingests one chunk of records for `tag` and flushes it.
    pub async fn flush(&self, tag: &str, records: Vec<HostRecord>) -> ResultCode {
        let _chunk = self.flush_lock.lock().await;
        debug!("[{}] Found {} records with tag {}", PLUGIN_NAME, records.len(), tag);

        for record in records {
            let Some(record) = self.decode(tag, record) else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            match self.engine.ingest(record).await {
                Ok(_) => {}
                Err(EngineError::Record(e)) => {
                    warn!("[{}] Dropping record: {}", PLUGIN_NAME, e);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return resolve_failure(&e),
            }
        }

        match self.engine.flush_tag(tag).await {
            Ok(outcome) => flush_result(tag, outcome),
            Err(e) => resolve_failure(&e),
        }
    }

    /// Delivers everything still buffered before the host shuts down.
    pub async fn exit(&self) -> ResultCode {
        let _chunk = self.flush_lock.lock().await;
        let mut code = ResultCode::Ok;
        for (destination, outcome) in self.engine.flush_all().await {
            if !outcome.is_success() {
                error!(
                    "[{}] Records for {} could not be delivered on exit",
                    PLUGIN_NAME, destination
                );
                code = ResultCode::Error;
            }
        }
        code
    }

    fn decode(&self, tag: &str, record: HostRecord) -> Option<LogRecord> {
        let timestamp = match record.timestamp {
            HostTimestamp::EpochSeconds(seconds) => i64::try_from(seconds)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000),
            HostTimestamp::Structured(time) => time.timestamp_millis(),
            HostTimestamp::Missing => self.engine.clock().now_millis(),
        };
        let message = self.message(tag, record.body)?;
        Some(LogRecord::new(tag, timestamp, message))
    }

    fn message(&self, tag: &str, body: HostBody) -> Option<String> {
        match (&self.log_key, body) {
            (Some(key), HostBody::Map(mut map)) => match map.remove(key) {
                Some(Value::String(text)) => Some(text),
                Some(value) => Some(value.to_string()),
                None => {
                    warn!(
                        "[{}] Dropping record with tag {}: no '{}' field",
                        PLUGIN_NAME, tag, key
                    );
                    None
                }
            },
            (Some(key), HostBody::Scalar(_)) => {
                warn!(
                    "[{}] Dropping record with tag {}: no '{}' field",
                    PLUGIN_NAME, tag, key
                );
                None
            }
            (None, HostBody::Map(map)) => match serde_json::to_string(&map) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("[{}] Dropping record with tag {}: {}", PLUGIN_NAME, tag, e);
                    None
                }
            },
            (None, HostBody::Scalar(Value::String(text))) => Some(text),
            (None, HostBody::Scalar(value)) => Some(value.to_string()),
        }
    }
}

fn resolve_failure(error: &EngineError) -> ResultCode {
    error!("[{}] {}", PLUGIN_NAME, error);
    if error.is_retryable() {
        ResultCode::Retry
    } else {
        ResultCode::Error
    }
}

fn flush_result(tag: &str, outcome: FlushOutcome) -> ResultCode {
    match outcome {
        FlushOutcome::NoOp => ResultCode::Ok,
        FlushOutcome::Delivered(report) => {
            debug!(
                "[{}] Processed {} events with tag {}",
                PLUGIN_NAME,
                report.delivered_records(),
                tag
            );
            ResultCode::Ok
        }
        // The host sends the chunk again, so the pending batches are let go.
        FlushOutcome::RetryableFailure {
            pending, reason, ..
        } => {
            warn!(
                "[{}] Flush of tag {} will be retried, releasing {} pending batches: {}",
                PLUGIN_NAME,
                tag,
                pending.len(),
                reason
            );
            ResultCode::Retry
        }
        FlushOutcome::FatalFailure(report) => {
            error!(
                "[{}] {} events with tag {} were rejected",
                PLUGIN_NAME,
                report.rejected_records(),
                tag
            );
            ResultCode::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::OutOfOrderPolicy;
    use crate::clock::ManualClock;
    use crate::errors::ApiError;
    use crate::test_support::ScriptedApi;
    use chrono::TimeZone;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn config(log_key: Option<&str>) -> Config {
        Config {
            log_group_name: "group".to_string(),
            log_stream_name: None,
            log_stream_prefix: Some("from-".to_string()),
            region: "us-east-1".to_string(),
            role_arn: None,
            log_key: log_key.map(str::to_string),
            auto_create_group: false,
            endpoint: None,
            out_of_order_policy: Default::default(),
            clock_skew_tolerance_ms: 5000,
            https_proxy: None,
            request_timeout_secs: 30,
        }
    }

    fn adapter(api: &Arc<ScriptedApi>, log_key: Option<&str>) -> PluginAdapter {
        PluginAdapter::init_with_clock(config(log_key), api.clone(), Arc::new(ManualClock::new(NOW)))
            .unwrap()
    }

    fn map_record(timestamp: HostTimestamp, body: Value) -> HostRecord {
        let Value::Object(map) = body else {
            panic!("body must be an object");
        };
        HostRecord {
            timestamp,
            body: HostBody::Map(map),
        }
    }

    #[test]
    fn test_register() {
        let registration = PluginAdapter::register();
        assert_eq!(registration.name, "cloudwatch");
        assert_eq!(ResultCode::Ok as i32, 1);
        assert_eq!(ResultCode::Retry as i32, 2);
        assert_eq!(ResultCode::Error as i32, 0);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = config(None);
        config.log_stream_name = Some("fixed".to_string());
        let result = PluginAdapter::init(config, Arc::new(ScriptedApi::new()));
        assert!(matches!(result, Err(ConfigError::ConflictingStreamNaming)));
    }

    #[tokio::test]
    async fn test_flush_whole_record_as_json() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, None);

        let code = adapter
            .flush(
                "app",
                vec![map_record(
                    HostTimestamp::EpochSeconds(1_700_000_000),
                    json!({"level": "info", "msg": "started"}),
                )],
            )
            .await;

        assert_eq!(code, ResultCode::Ok);
        let requests = api.put_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].log_stream_name, "from-app");
        assert_eq!(requests[0].log_events[0].timestamp, 1_700_000_000_000);
        let message: Value = serde_json::from_str(&requests[0].log_events[0].message).unwrap();
        assert_eq!(message, json!({"level": "info", "msg": "started"}));
    }

    #[tokio::test]
    async fn test_flush_with_log_key() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, Some("log"));
        let structured = Utc.timestamp_millis_opt(NOW - 10).unwrap();

        let code = adapter
            .flush(
                "app",
                vec![
                    map_record(
                        HostTimestamp::Structured(structured),
                        json!({"log": "plain line", "stream": "stdout"}),
                    ),
                    map_record(HostTimestamp::Missing, json!({"log": {"nested": true}})),
                    map_record(HostTimestamp::Missing, json!({"other": "field"})),
                ],
            )
            .await;

        assert_eq!(code, ResultCode::Ok);
        assert_eq!(adapter.dropped_records(), 1);
        let events = &api.put_requests()[0].log_events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "plain line");
        assert_eq!(events[0].timestamp, NOW - 10);
        assert_eq!(events[1].message, r#"{"nested":true}"#);
        assert_eq!(events[1].timestamp, NOW);
    }

    #[tokio::test]
    async fn test_scalar_body() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, None);

        adapter
            .flush(
                "app",
                vec![
                    HostRecord {
                        timestamp: HostTimestamp::Missing,
                        body: HostBody::Scalar(json!("raw text")),
                    },
                    HostRecord {
                        timestamp: HostTimestamp::Missing,
                        body: HostBody::Scalar(json!(42)),
                    },
                ],
            )
            .await;

        let events = &api.put_requests()[0].log_events;
        assert_eq!(events[0].message, "raw text");
        assert_eq!(events[1].message, "42");
    }

    #[tokio::test]
    async fn test_empty_chunk_is_ok() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, None);
        assert_eq!(adapter.flush("app", Vec::new()).await, ResultCode::Ok);
        assert!(api.put_requests().is_empty());
    }

    #[tokio::test]
    async fn test_throttled_flush_asks_for_retry() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Throttled("Rate exceeded".to_string()));
        let adapter = adapter(&api, None);
        let chunk = vec![map_record(HostTimestamp::Missing, json!({"a": 1}))];

        assert_eq!(adapter.flush("app", chunk.clone()).await, ResultCode::Retry);
        assert_eq!(adapter.flush("app", chunk).await, ResultCode::Ok);

        let requests = api.put_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].log_events.len(), 1);
    }

    fn past_chunk() -> Vec<HostRecord> {
        (0..3)
            .map(|i| {
                map_record(
                    HostTimestamp::EpochSeconds(1_699_999_000 + 60 * i),
                    json!({ "n": i }),
                )
            })
            .collect()
    }

    fn timestamps(request: &crate::api::PutLogEventsRequest) -> Vec<i64> {
        request.log_events.iter().map(|event| event.timestamp).collect()
    }

    #[tokio::test]
    async fn test_retried_chunk_is_resent_unchanged() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Throttled("Rate exceeded".to_string()));
        let adapter = adapter(&api, None);

        assert_eq!(adapter.flush("app", past_chunk()).await, ResultCode::Retry);
        assert_eq!(adapter.flush("app", past_chunk()).await, ResultCode::Ok);

        let requests = api.put_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            timestamps(&requests[0]),
            vec![1_699_999_000_000, 1_699_999_060_000, 1_699_999_120_000]
        );
        assert_eq!(timestamps(&requests[1]), timestamps(&requests[0]));
        assert_eq!(requests[1].log_events, requests[0].log_events);
        assert_eq!(adapter.dropped_records(), 0);
    }

    #[tokio::test]
    async fn test_retried_chunk_is_not_dropped_under_reject_policy() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Throttled("Rate exceeded".to_string()));
        let mut config = config(None);
        config.out_of_order_policy = OutOfOrderPolicy::Reject;
        let adapter =
            PluginAdapter::init_with_clock(config, api.clone(), Arc::new(ManualClock::new(NOW)))
                .unwrap();

        assert_eq!(adapter.flush("app", past_chunk()).await, ResultCode::Retry);
        assert_eq!(adapter.flush("app", past_chunk()).await, ResultCode::Ok);

        let requests = api.put_requests();
        assert_eq!(requests[1].log_events.len(), 3);
        assert_eq!(adapter.dropped_records(), 0);
    }

    #[tokio::test]
    async fn test_extreme_timestamps_do_not_share_a_batch() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, None);
        let year_one = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();

        let code = adapter
            .flush(
                "app",
                vec![
                    map_record(HostTimestamp::Structured(year_one), json!({"a": 1})),
                    map_record(HostTimestamp::EpochSeconds(u64::MAX), json!({"b": 2})),
                ],
            )
            .await;

        assert_eq!(code, ResultCode::Ok);
        let requests = api.put_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].log_events[0].timestamp, year_one.timestamp_millis());
        assert_eq!(requests[1].log_events[0].timestamp, i64::MAX);
    }

    #[tokio::test]
    async fn test_rejected_batch_is_error() {
        let api = Arc::new(ScriptedApi::new());
        api.push_put_error(ApiError::Rejected {
            kind: "InvalidParameterException".to_string(),
            message: "bad".to_string(),
        });
        let adapter = adapter(&api, None);

        let code = adapter
            .flush("app", vec![map_record(HostTimestamp::Missing, json!({"a": 1}))])
            .await;
        assert_eq!(code, ResultCode::Error);
    }

    #[tokio::test]
    async fn test_resolution_failures() {
        let api = Arc::new(ScriptedApi::new());
        api.push_stream(Err(ApiError::Transient("reset".to_string())));
        api.push_stream(Err(ApiError::ResourceNotFound("group".to_string())));
        let adapter = adapter(&api, None);
        let chunk = vec![map_record(HostTimestamp::Missing, json!({"a": 1}))];

        assert_eq!(adapter.flush("app", chunk.clone()).await, ResultCode::Retry);
        assert_eq!(adapter.flush("app", chunk).await, ResultCode::Error);
        assert!(api.put_requests().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_record_is_dropped() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, Some("log"));
        let huge = "x".repeat(crate::constants::MAX_EVENT_SIZE_BYTES);

        let code = adapter
            .flush(
                "app",
                vec![
                    map_record(HostTimestamp::Missing, json!({ "log": huge })),
                    map_record(HostTimestamp::Missing, json!({"log": "small"})),
                ],
            )
            .await;

        assert_eq!(code, ResultCode::Ok);
        assert_eq!(adapter.dropped_records(), 1);
        assert_eq!(api.put_requests()[0].log_events.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_flushes_everything() {
        let api = Arc::new(ScriptedApi::new());
        let adapter = adapter(&api, None);
        adapter
            .engine()
            .ingest(LogRecord::new("app", NOW, "left over"))
            .await
            .unwrap();

        assert_eq!(adapter.exit().await, ResultCode::Ok);
        assert_eq!(api.put_requests().len(), 1);
    }
}
