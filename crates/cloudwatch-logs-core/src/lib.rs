// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching and ordered delivery of log records to CloudWatch Logs.
//!
//! Records are accepted one at a time, routed to a `(log group, log stream)`
//! destination derived from their tag, buffered into batches that respect the
//! PutLogEvents limits, and delivered on an explicit per-tag flush.
//!
//! ```text
//!   ingest(record) ──> DestinationResolver ──> Accumulator (per destination)
//!                                                   │ sealed batches
//!   flush_tag(tag) ──> FlushOrchestrator ──────────┘
//!                            │
//!                            v
//!                     DeliveryClient ──> LogsApi (PutLogEvents)
//!                            │
//!                     StreamSequencer (sequence token)
//! ```
//!
//! The host runtime talks to the engine through [`adapter::PluginAdapter`],
//! which maps results onto its processed / retry / error codes.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod adapter;
pub mod api;
pub mod batch;
pub mod clock;
pub mod cloudwatch;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod engine;
pub mod errors;
pub mod flusher;
pub mod http;
pub mod record;
pub mod resolver;
pub mod sequencer;
pub mod sigv4;
pub mod streams;
pub mod template;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::Engine;
pub use record::{Destination, LogRecord};
