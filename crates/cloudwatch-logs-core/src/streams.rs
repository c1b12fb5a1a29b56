// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination state, keyed by [`Destination`].
//!
//! Each destination owns a [`StreamSlot`] with two locks:
//!
//! - a short synchronous buffer lock around the accumulator and the queue of
//!   sealed batches, never held across an await
//! - an async delivery lock around the sequencer, held for the whole of a
//!   flush so appends to one stream are serialized
//!
//! The registry's own lock is only taken to look up or insert a slot, so
//! destinations never wait on each other.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::accumulator::{Accumulator, OrderingAdjustment, OrderingConfig};
use crate::batch::{Batch, BatchLimits};
use crate::clock::Clock;
use crate::errors::RecordError;
use crate::record::{Destination, LogRecord};
use crate::sequencer::StreamSequencer;

#[derive(Debug)]
struct Buffer {
    accumulator: Accumulator,
    sealed: VecDeque<Batch>,
}

#[derive(Debug)]
pub struct StreamSlot {
    buffer: Mutex<Buffer>,
    delivery: tokio::sync::Mutex<StreamSequencer>,
}

impl StreamSlot {
    fn new(
        destination: Destination,
        limits: BatchLimits,
        ordering: OrderingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                accumulator: Accumulator::new(destination.clone(), limits, ordering, clock),
                sealed: VecDeque::new(),
            }),
            delivery: tokio::sync::Mutex::new(StreamSequencer::new(destination)),
        }
    }

    /// Adds a record, parking any batch it seals at the back of the queue.
    pub fn append(&self, record: LogRecord) -> Result<Option<OrderingAdjustment>, RecordError> {
        let mut buffer = self.lock_buffer();
        let appended = buffer.accumulator.append(record)?;
        if let Some(batch) = appended.sealed {
            buffer.sealed.push_back(batch);
        }
        Ok(appended.adjustment)
    }

    /// Moves the in-progress batch, if any, to the back of the queue.
    pub fn seal_current(&self) {
        let mut buffer = self.lock_buffer();
        if let Some(batch) = buffer.accumulator.drain() {
            buffer.sealed.push_back(batch);
        }
    }

    /// A copy of the oldest queued batch.
    #[must_use]
    pub fn front(&self) -> Option<Batch> {
        self.lock_buffer().sealed.front().cloned()
    }

    pub fn pop_front(&self) -> Option<Batch> {
        self.lock_buffer().sealed.pop_front()
    }

    /// Marks a batch taken from this slot as accepted by the service.
    pub fn commit_delivered(&self, batch: &Batch) {
        self.lock_buffer().accumulator.commit(batch);
    }

    /// Empties the queue, oldest first, and rewinds the ordering floor so the
    /// returned records can be appended again without adjustment.
    pub fn hand_back(&self) -> Vec<Batch> {
        let mut buffer = self.lock_buffer();
        let queued = buffer.sealed.drain(..).collect();
        buffer.accumulator.rewind();
        queued
    }

    /// Number of sealed batches waiting for delivery.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock_buffer().sealed.len()
    }

    /// Number of records in the in-progress batch.
    #[must_use]
    pub fn buffered_records(&self) -> usize {
        self.lock_buffer().accumulator.current().len()
    }

    pub async fn lock_delivery(&self) -> tokio::sync::MutexGuard<'_, StreamSequencer> {
        self.delivery.lock().await
    }

    // The buffer is consistent between statements, so a panic elsewhere
    // while holding the lock leaves nothing half-written.
    fn lock_buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct StreamRegistry {
    limits: BatchLimits,
    ordering: OrderingConfig,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<Destination, Arc<StreamSlot>>>,
}

impl StreamRegistry {
    pub fn new(limits: BatchLimits, ordering: OrderingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            ordering,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, destination: &Destination) -> Option<Arc<StreamSlot>> {
        self.lock_slots().get(destination).cloned()
    }

    pub fn get_or_create(&self, destination: &Destination) -> Arc<StreamSlot> {
        self.lock_slots()
            .entry(destination.clone())
            .or_insert_with(|| {
                Arc::new(StreamSlot::new(
                    destination.clone(),
                    self.limits,
                    self.ordering,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Every destination seen so far, sorted.
    #[must_use]
    pub fn destinations(&self) -> Vec<Destination> {
        let mut destinations: Vec<_> = self.lock_slots().keys().cloned().collect();
        destinations.sort();
        destinations
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<Destination, Arc<StreamSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
