// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The batching-and-delivery engine.
//!
//! [`Engine`] owns one [`StreamSlot`](crate::streams::StreamSlot) per
//! destination and does all of its work on the caller's task: `ingest`
//! resolves and buffers, `flush_tag` delivers. Nothing runs in the
//! background.

use std::sync::Arc;

use tracing::debug;

use crate::accumulator::{OrderingAdjustment, OrderingConfig};
use crate::api::LogsApi;
use crate::batch::{Batch, BatchLimits};
use crate::clock::Clock;
use crate::delivery::DeliveryClient;
use crate::errors::{ConfigError, EngineError};
use crate::flusher::{FlushOrchestrator, FlushOutcome};
use crate::record::{Destination, LogRecord};
use crate::resolver::{DestinationResolver, NamingConfig};
use crate::streams::StreamRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub naming: NamingConfig,
    pub auto_create_group: bool,
    pub limits: BatchLimits,
    pub ordering: OrderingConfig,
}

/// Where an ingested record went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub destination: Destination,
    pub adjustment: Option<OrderingAdjustment>,
}

pub struct Engine {
    resolver: DestinationResolver,
    streams: StreamRegistry,
    orchestrator: FlushOrchestrator,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn LogsApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.limits.validate()?;
        if config.ordering.skew_tolerance_ms < 0 {
            return Err(ConfigError::InvalidValue {
                key: "clock_skew_tolerance_ms",
                value: config.ordering.skew_tolerance_ms.to_string(),
            });
        }
        Ok(Self {
            resolver: DestinationResolver::new(config.naming, config.auto_create_group, api.clone()),
            streams: StreamRegistry::new(config.limits, config.ordering, clock.clone()),
            orchestrator: FlushOrchestrator::new(DeliveryClient::new(api)),
            clock,
        })
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    /// Routes a record to its destination and buffers it.
    ///
    /// The only network I/O is the one-time creation of a new destination.
    /// A batch sealed to make room for the record is queued for the next
    /// flush.
    pub async fn ingest(&self, record: LogRecord) -> Result<Ingested, EngineError> {
        let destination = self.resolver.resolve(record.source_tag()).await?;
        let slot = self.streams.get_or_create(&destination);
        let adjustment = slot.append(record)?;
        Ok(Ingested {
            destination,
            adjustment,
        })
    }

    /// Delivers everything buffered for the destination `tag` maps to.
    ///
    /// Returns [`FlushOutcome::NoOp`] without any network I/O when no record
    /// has been ingested for that destination.
    pub async fn flush_tag(&self, tag: &str) -> Result<FlushOutcome, EngineError> {
        let destination = self.resolver.destination_for(tag)?;
        Ok(self.flush(&destination).await)
    }

    pub async fn flush(&self, destination: &Destination) -> FlushOutcome {
        match self.streams.get(destination) {
            Some(slot) => self.orchestrator.flush(destination, &slot).await,
            None => {
                debug!("Nothing to flush for {}", destination);
                FlushOutcome::NoOp
            }
        }
    }

    /// Delivers a batch handed back by an earlier flush.
    pub async fn redeliver(&self, batch: Batch) -> FlushOutcome {
        let slot = self.streams.get_or_create(batch.destination());
        self.orchestrator.redeliver(&slot, batch).await
    }

    /// Flushes every destination seen so far.
    pub async fn flush_all(&self) -> Vec<(Destination, FlushOutcome)> {
        let mut outcomes = Vec::new();
        for destination in self.streams.destinations() {
            let outcome = self.flush(&destination).await;
            outcomes.push((destination, outcome));
        }
        outcomes
    }

    #[must_use]
    pub fn destinations(&self) -> Vec<Destination> {
        self.streams.destinations()
    }

    /// Sealed batches waiting for delivery to `destination`.
    #[must_use]
    pub fn queued_batches(&self, destination: &Destination) -> usize {
        self.streams
            .get(destination)
            .map_or(0, |slot| slot.queued())
    }
}
