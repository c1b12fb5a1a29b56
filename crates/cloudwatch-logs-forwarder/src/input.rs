// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON input.
//!
//! Each line is `{"tag": "...", "time": ..., "record": ...}`. `time` is
//! optional and may be integer epoch seconds, fractional epoch seconds or an
//! RFC 3339 string.

use chrono::{DateTime, Utc};
use cloudwatch_logs_core::adapter::{HostBody, HostRecord, HostTimestamp};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid JSON line: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty tag")]
    EmptyTag,
    #[error("unsupported time value: {0}")]
    InvalidTime(String),
}

#[derive(Debug, Deserialize)]
struct Line {
    tag: String,
    #[serde(default)]
    time: Value,
    record: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedRecord {
    pub tag: String,
    pub record: HostRecord,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<TaggedRecord>, InputError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let line: Line = serde_json::from_str(line)?;
    if line.tag.is_empty() {
        return Err(InputError::EmptyTag);
    }
    let body = match line.record {
        Value::Object(map) => HostBody::Map(map),
        other => HostBody::Scalar(other),
    };
    Ok(Some(TaggedRecord {
        tag: line.tag,
        record: HostRecord {
            timestamp: parse_time(line.time)?,
            body,
        },
    }))
}

fn parse_time(time: Value) -> Result<HostTimestamp, InputError> {
    match time {
        Value::Null => Ok(HostTimestamp::Missing),
        Value::Number(number) => {
            if let Some(seconds) = number.as_u64() {
                return Ok(HostTimestamp::EpochSeconds(seconds));
            }
            let seconds = number
                .as_f64()
                .filter(|seconds| *seconds >= 0.0)
                .ok_or_else(|| InputError::InvalidTime(number.to_string()))?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let (whole, nanos) = (seconds.trunc() as i64, (seconds.fract() * 1e9) as u32);
            DateTime::<Utc>::from_timestamp(whole, nanos)
                .map(HostTimestamp::Structured)
                .ok_or_else(|| InputError::InvalidTime(number.to_string()))
        }
        Value::String(text) => DateTime::parse_from_rfc3339(&text)
            .map(|time| HostTimestamp::Structured(time.with_timezone(&Utc)))
            .map_err(|_| InputError::InvalidTime(text)),
        other => Err(InputError::InvalidTime(other.to_string())),
    }
}
