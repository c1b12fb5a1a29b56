// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered, bounded groups of records bound for one destination.

use crate::constants;
use crate::errors::ConfigError;
use crate::record::{Destination, LogRecord};

/// Hard limits a batch must respect to be accepted by PutLogEvents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum batch size, per-event overhead included.
    pub max_batch_bytes: usize,
    pub max_batch_events: usize,
    /// Maximum distance between the oldest and newest record.
    pub max_batch_span_ms: i64,
    /// Maximum size of one record, overhead included.
    pub max_event_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_bytes: constants::MAX_BATCH_SIZE_BYTES,
            max_batch_events: constants::MAX_BATCH_EVENTS,
            max_batch_span_ms: constants::MAX_BATCH_SPAN_MS,
            max_event_bytes: constants::MAX_EVENT_SIZE_BYTES,
        }
    }
}

impl BatchLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_bytes == 0 || self.max_batch_events == 0 || self.max_event_bytes == 0 {
            return Err(ConfigError::InvalidLimits(
                "byte and event limits must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_span_ms < 0 {
            return Err(ConfigError::InvalidLimits(
                "batch span cannot be negative".to_string(),
            ));
        }
        // A record that passes the event check must always fit an empty batch.
        if self.max_event_bytes > self.max_batch_bytes {
            return Err(ConfigError::InvalidLimits(format!(
                "max event size {} exceeds max batch size {}",
                self.max_event_bytes, self.max_batch_bytes
            )));
        }
        Ok(())
    }
}

/// Which limit forced a batch to be sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bytes,
    Events,
    Span,
}

/// Records for a single destination, kept sorted by timestamp.
///
/// Records with equal timestamps keep their arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    destination: Destination,
    records: Vec<LogRecord>,
    size_bytes: usize,
}

impl Batch {
    #[must_use]
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            records: Vec::new(),
            size_bytes: 0,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    #[must_use]
    pub fn earliest(&self) -> Option<i64> {
        self.records.first().map(LogRecord::timestamp)
    }

    #[must_use]
    pub fn latest(&self) -> Option<i64> {
        self.records.last().map(LogRecord::timestamp)
    }

    /// Distance between the oldest and newest record, saturating at
    /// `i64::MAX`.
    #[must_use]
    pub fn span_ms(&self) -> i64 {
        match (self.earliest(), self.latest()) {
            (Some(earliest), Some(latest)) => latest.saturating_sub(earliest),
            _ => 0,
        }
    }

    /// Returns the first limit adding `record` would break, if any.
    #[must_use]
    pub fn exceeded_limit(&self, record: &LogRecord, limits: &BatchLimits) -> Option<Limit> {
        if self.records.len() + 1 > limits.max_batch_events {
            return Some(Limit::Events);
        }
        if self.size_bytes + record.size() > limits.max_batch_bytes {
            return Some(Limit::Bytes);
        }
        if let (Some(earliest), Some(latest)) = (self.earliest(), self.latest()) {
            let timestamp = record.timestamp();
            let span = latest.max(timestamp).saturating_sub(earliest.min(timestamp));
            if span > limits.max_batch_span_ms {
                return Some(Limit::Span);
            }
        }
        None
    }

    /// Inserts after every record with a timestamp less than or equal to the
    /// new one. Callers check [`Batch::exceeded_limit`] first.
    pub(crate) fn push(&mut self, record: LogRecord) {
        let timestamp = record.timestamp();
        let at = self
            .records
            .partition_point(|existing| existing.timestamp() <= timestamp);
        self.size_bytes += record.size();
        self.records.insert(at, record);
    }
}
