// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for wiring an engine to a mock CloudWatch Logs endpoint

use cloudwatch_logs_core::accumulator::OrderingConfig;
use cloudwatch_logs_core::batch::BatchLimits;
use cloudwatch_logs_core::clock::ManualClock;
use cloudwatch_logs_core::cloudwatch::{CloudWatchLogsClient, SignRequest};
use cloudwatch_logs_core::engine::EngineConfig;
use cloudwatch_logs_core::http::build_client;
use cloudwatch_logs_core::resolver::{NamingConfig, StreamNaming};
use cloudwatch_logs_core::template::NameTemplate;
use cloudwatch_logs_core::Engine;
use mockito::{Matcher, Mock, ServerGuard};
use std::sync::Arc;
use std::time::Duration;

pub const GROUP: &str = "group";
pub const STREAM_PREFIX: &str = "from-";

pub fn client(server: &ServerGuard, signer: Arc<dyn SignRequest>) -> CloudWatchLogsClient {
    CloudWatchLogsClient::new(
        build_client(Duration::from_secs(5), None).expect("failed to build client"),
        server.url(),
        signer,
    )
}

pub fn engine(client: CloudWatchLogsClient, limits: BatchLimits, now_millis: i64) -> Engine {
    Engine::new(
        EngineConfig {
            naming: NamingConfig {
                group: NameTemplate::parse(GROUP).expect("failed to parse template"),
                stream: StreamNaming::Prefix(STREAM_PREFIX.to_string()),
            },
            auto_create_group: false,
            limits,
            ordering: OrderingConfig::default(),
        },
        Arc::new(client),
        Arc::new(ManualClock::new(now_millis)),
    )
    .expect("failed to create engine")
}

pub fn target(operation: &str) -> String {
    format!("Logs_20140328.{operation}")
}

/// Accepts CreateLogStream for any stream.
pub async fn mock_create_stream(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/")
        .match_header("x-amz-target", target("CreateLogStream").as_str())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await
}

pub fn put_for_stream(stream: &str) -> Matcher {
    Matcher::PartialJson(serde_json::json!({
        "logGroupName": GROUP,
        "logStreamName": stream,
    }))
}
