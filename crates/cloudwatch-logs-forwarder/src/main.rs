// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod chunks;
mod input;

use std::{env, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{interval, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cloudwatch_logs_core::{
    adapter::{PluginAdapter, ResultCode},
    cloudwatch::CloudWatchLogsClient,
    config::Config,
    sigv4::request_signer,
};

use chunks::{Chunk, ChunkBuffer};

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_CHUNK_RECORDS: usize = 1000;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("CLOUDWATCH_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,aws_config=warn,aws_smithy_runtime=warn,{}",
        log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let registration = PluginAdapter::register();
    info!("{}: {}", registration.name, registration.description);

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return;
        }
    };
    let signer = match request_signer(&config).await {
        Ok(signer) => signer,
        Err(e) => {
            error!("Error loading AWS credentials: {e}");
            return;
        }
    };
    let client = match CloudWatchLogsClient::from_config(&config, signer) {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating CloudWatch Logs client: {e}");
            return;
        }
    };
    let adapter = match PluginAdapter::init(config, Arc::new(client)) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Error initializing plugin: {e}");
            return;
        }
    };

    let flush_interval_secs = env_number("CLOUDWATCH_FLUSH_INTERVAL_SECS", DEFAULT_FLUSH_INTERVAL_SECS);
    let chunk_records = env_number("CLOUDWATCH_CHUNK_RECORDS", DEFAULT_CHUNK_RECORDS);
    let max_retries = env_number("CLOUDWATCH_MAX_RETRIES", DEFAULT_MAX_RETRIES);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = ChunkBuffer::new(chunk_records);
    let mut retries: Vec<(String, Chunk)> = Vec::new();

    let mut flush_interval = interval(Duration::from_secs(flush_interval_secs.max(1)));
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = flush_interval.tick() => {
                retries = retry_chunks(&adapter, std::mem::take(&mut retries), max_retries).await;
                for (tag, chunk) in buffer.take_all() {
                    flush_chunk(&adapter, tag, chunk, &mut retries, max_retries).await;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match input::parse_line(&line) {
                    Ok(Some(parsed)) => {
                        if buffer.push(&parsed.tag, parsed.record) {
                            if let Some(chunk) = buffer.take(&parsed.tag) {
                                flush_chunk(&adapter, parsed.tag, chunk, &mut retries, max_retries).await;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping input line: {e}"),
                },
                Ok(None) => {
                    debug!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Error reading input: {e}");
                    break;
                }
            }
        }
    }

    // One last attempt for everything still held before exiting.
    for (tag, chunk) in retries.into_iter().chain(buffer.take_all()) {
        let count = chunk.records.len();
        if adapter.flush(&tag, chunk.records).await != ResultCode::Ok {
            error!("Dropping {count} records with tag {tag} at shutdown");
        }
    }
    if adapter.exit().await != ResultCode::Ok {
        error!("Some records could not be delivered before exit");
    }
    info!(
        "Forwarder stopped, {} records dropped",
        adapter.dropped_records()
    );
}

async fn flush_chunk(
    adapter: &PluginAdapter,
    tag: String,
    mut chunk: Chunk,
    retries: &mut Vec<(String, Chunk)>,
    max_retries: u32,
) {
    match adapter.flush(&tag, chunk.records.clone()).await {
        ResultCode::Ok => {}
        ResultCode::Retry => {
            chunk.attempts += 1;
            if chunk.attempts > max_retries {
                error!(
                    "Dropping {} records with tag {tag} after {} attempts",
                    chunk.records.len(),
                    chunk.attempts
                );
            } else {
                debug!("Will retry {} records with tag {tag}", chunk.records.len());
                retries.push((tag, chunk));
            }
        }
        ResultCode::Error => {
            error!(
                "Dropping {} records with tag {tag}: unrecoverable error",
                chunk.records.len()
            );
        }
    }
}

async fn retry_chunks(
    adapter: &PluginAdapter,
    chunks: Vec<(String, Chunk)>,
    max_retries: u32,
) -> Vec<(String, Chunk)> {
    let mut still_failing = Vec::new();
    for (tag, chunk) in chunks {
        flush_chunk(adapter, tag, chunk, &mut still_failing, max_retries).await;
    }
    still_failing
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}
