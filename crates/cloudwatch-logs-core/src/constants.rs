// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs API limits and protocol constants.
//!
//! The PutLogEvents call rejects a whole request when any of these limits is
//! exceeded, so the accumulator seals batches before they are reached.

/// Bytes the service adds to every event when computing the batch size.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Maximum size of one PutLogEvents batch, overhead included.
pub const MAX_BATCH_SIZE_BYTES: usize = 1_048_576;

/// Maximum number of events in one PutLogEvents batch.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Maximum distance between the oldest and newest event of a batch.
pub const MAX_BATCH_SPAN_MS: i64 = 24 * 60 * 60 * 1_000;

/// Maximum size of a single event, overhead included.
pub const MAX_EVENT_SIZE_BYTES: usize = 262_144;

/// How far behind the last sealed batch a record may be before the
/// out-of-order policy kicks in.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_MS: i64 = 5_000;

/// Longest log group or log stream name the service accepts.
pub const MAX_NAME_LENGTH: usize = 512;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Prefix of the `X-Amz-Target` header for the Logs JSON protocol.
pub(crate) const TARGET_PREFIX: &str = "Logs_20140328";

pub(crate) const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
