// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination buffering of records into PutLogEvents-sized batches.
//!
//! # Batching Strategy
//!
//! Records are added to an in-progress batch until the next record would
//! break one of the hard limits:
//! 1. **Size**: total bytes, per-event overhead included
//! 2. **Count**: number of events
//! 3. **Span**: distance between oldest and newest timestamp
//!
//! When that happens the in-progress batch is sealed and handed back to the
//! caller, and the record starts a new batch. Records larger than the
//! per-event limit are rejected outright; they are never truncated.
//!
//! # Ordering
//!
//! Within a batch records are kept sorted by timestamp (stable on ties).
//! Across batches, a record older than the newest timestamp already sealed
//! (minus a skew tolerance) is handled by the [`OutOfOrderPolicy`]. Batches
//! handed back undelivered stop counting through [`Accumulator::rewind`], so
//! their records can be appended again unchanged.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{Batch, BatchLimits};
use crate::clock::Clock;
use crate::constants::DEFAULT_CLOCK_SKEW_TOLERANCE_MS;
use crate::errors::RecordError;
use crate::record::{Destination, LogRecord};

/// What to do with a record older than the accepted floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfOrderPolicy {
    /// Rewrite the timestamp to the current time and keep the record.
    #[default]
    Clamp,
    /// Drop the record with [`RecordError::OutOfOrder`].
    Reject,
}

impl FromStr for OutOfOrderPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "clamp" => Ok(Self::Clamp),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown out-of-order policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingConfig {
    pub policy: OutOfOrderPolicy,
    pub skew_tolerance_ms: i64,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            policy: OutOfOrderPolicy::default(),
            skew_tolerance_ms: DEFAULT_CLOCK_SKEW_TOLERANCE_MS,
        }
    }
}

/// A record's timestamp was rewritten to keep the stream ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingAdjustment {
    pub original: i64,
    pub adjusted: i64,
}

/// Result of a successful [`Accumulator::append`].
#[derive(Debug)]
pub struct Appended {
    /// The batch closed to make room for the record, ready to deliver.
    pub sealed: Option<Batch>,
    pub adjustment: Option<OrderingAdjustment>,
}

#[derive(Debug)]
pub struct Accumulator {
    destination: Destination,
    limits: BatchLimits,
    ordering: OrderingConfig,
    clock: Arc<dyn Clock>,
    current: Batch,
    /// Newest timestamp of any batch sealed or drained and not handed back.
    last_sealed: Option<i64>,
    /// Newest timestamp the service has accepted.
    committed: Option<i64>,
}

impl Accumulator {
    #[must_use]
    pub fn new(
        destination: Destination,
        limits: BatchLimits,
        ordering: OrderingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            current: Batch::new(destination.clone()),
            destination,
            limits,
            ordering,
            clock,
            last_sealed: None,
            committed: None,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The in-progress batch.
    #[must_use]
    pub fn current(&self) -> &Batch {
        &self.current
    }

    pub fn append(&mut self, record: LogRecord) -> Result<Appended, RecordError> {
        let size = record.size();
        if size > self.limits.max_event_bytes {
            return Err(RecordError::Oversize {
                destination: self.destination.clone(),
                size,
                max: self.limits.max_event_bytes,
            });
        }

        let (record, adjustment) = self.enforce_order(record)?;

        let mut sealed = None;
        if !self.current.is_empty() {
            if let Some(limit) = self.current.exceeded_limit(&record, &self.limits) {
                debug!(
                    "Sealing batch of {} events ({} bytes) for {}: {:?} limit reached",
                    self.current.len(),
                    self.current.size_bytes(),
                    self.destination,
                    limit
                );
                sealed = Some(self.seal());
            }
        }
        self.current.push(record);

        Ok(Appended { sealed, adjustment })
    }

    /// Takes the in-progress batch, leaving an empty one behind.
    pub fn drain(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        Some(self.seal())
    }

    /// Records that a batch sealed here was accepted by the service.
    pub fn commit(&mut self, batch: &Batch) {
        if let Some(latest) = batch.latest() {
            self.committed = Some(newest(self.committed, latest));
            self.last_sealed = Some(newest(self.last_sealed, latest));
        }
    }

    /// Moves the ordering floor back to the newest committed timestamp.
    ///
    /// Called once every sealed batch that was not delivered has left the
    /// queue.
    pub fn rewind(&mut self) {
        if self.last_sealed != self.committed {
            debug!(
                "Ordering floor for {} moved back from {:?} to {:?}",
                self.destination, self.last_sealed, self.committed
            );
        }
        self.last_sealed = self.committed;
    }

    fn seal(&mut self) -> Batch {
        let batch = std::mem::replace(&mut self.current, Batch::new(self.destination.clone()));
        if let Some(latest) = batch.latest() {
            self.last_sealed = Some(newest(self.last_sealed, latest));
        }
        batch
    }

    fn enforce_order(
        &self,
        record: LogRecord,
    ) -> Result<(LogRecord, Option<OrderingAdjustment>), RecordError> {
        let Some(last_sealed) = self.last_sealed else {
            return Ok((record, None));
        };
        let floor = last_sealed.saturating_sub(self.ordering.skew_tolerance_ms);
        let original = record.timestamp();
        if original >= floor {
            return Ok((record, None));
        }

        match self.ordering.policy {
            OutOfOrderPolicy::Reject => Err(RecordError::OutOfOrder {
                destination: self.destination.clone(),
                timestamp: original,
                floor,
            }),
            OutOfOrderPolicy::Clamp => {
                let adjusted = self.clock.now_millis().max(last_sealed);
                warn!(
                    "Timestamp {} for {} is older than {}, clamped to {}",
                    original, self.destination, floor, adjusted
                );
                Ok((
                    record.with_timestamp(adjusted),
                    Some(OrderingAdjustment { original, adjusted }),
                ))
            }
        }
    }
}

fn newest(current: Option<i64>, timestamp: i64) -> i64 {
    current.map_or(timestamp, |current| current.max(timestamp))
}
