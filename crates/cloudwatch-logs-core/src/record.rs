// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::constants::EVENT_OVERHEAD_BYTES;

/// A single log event accepted from the host.
///
/// Timestamps are milliseconds since the Unix epoch, the unit PutLogEvents
/// expects. A record is never mutated once built; clamping its timestamp
/// produces a new record through [`LogRecord::with_timestamp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: i64,
    message: String,
    source_tag: String,
}

impl LogRecord {
    pub fn new(source_tag: impl Into<String>, timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            source_tag: source_tag.into(),
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Bytes this record counts for against the batch limit.
    #[must_use]
    pub fn size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }

    #[must_use]
    pub fn with_timestamp(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }
}

/// The log group and log stream a record is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub group: String,
    pub stream: String,
}

impl Destination {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}
