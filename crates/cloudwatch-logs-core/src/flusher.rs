// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::delivery::DeliveryClient;
use crate::record::Destination;
use crate::streams::StreamSlot;

/// A batch the service refused for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBatch {
    pub batch: Batch,
    pub reason: String,
}

/// What a flush did to the batches of one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub destination: Destination,
    pub delivered: Vec<Batch>,
    pub rejected: Vec<RejectedBatch>,
}

impl FlushReport {
    fn new(destination: Destination) -> Self {
        Self {
            destination,
            delivered: Vec::new(),
            rejected: Vec::new(),
        }
    }

    #[must_use]
    pub fn delivered_records(&self) -> usize {
        self.delivered.iter().map(Batch::len).sum()
    }

    #[must_use]
    pub fn rejected_records(&self) -> usize {
        self.rejected.iter().map(|rejected| rejected.batch.len()).sum()
    }

    fn into_outcome(self) -> FlushOutcome {
        if !self.rejected.is_empty() {
            FlushOutcome::FatalFailure(self)
        } else if self.delivered.is_empty() {
            FlushOutcome::NoOp
        } else {
            FlushOutcome::Delivered(self)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued for the destination.
    NoOp,
    /// Every queued batch was accepted.
    Delivered(FlushReport),
    /// Delivery stopped at a retryable failure. `pending` holds the failed
    /// batch followed by every batch queued after it, unmodified.
    ///
    /// That includes batches sealed by ingests running during the flush, but
    /// never records still in the in-progress batch. Those stay buffered for
    /// the next flush.
    RetryableFailure {
        report: FlushReport,
        pending: Vec<Batch>,
        reason: String,
    },
    /// At least one batch was rejected permanently. Batches queued after it
    /// were still attempted.
    FatalFailure(FlushReport),
}

impl FlushOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NoOp | Self::Delivered(_))
    }

    #[must_use]
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            Self::NoOp => None,
            Self::Delivered(report)
            | Self::FatalFailure(report)
            | Self::RetryableFailure { report, .. } => Some(report),
        }
    }

    /// Batches handed back for a later retry.
    #[must_use]
    pub fn pending(&self) -> &[Batch] {
        match self {
            Self::RetryableFailure { pending, .. } => pending,
            _ => &[],
        }
    }
}

/// Drains a destination's queue through the [`DeliveryClient`].
#[derive(Clone)]
pub struct FlushOrchestrator {
    delivery: DeliveryClient,
}

impl FlushOrchestrator {
    #[must_use]
    pub fn new(delivery: DeliveryClient) -> Self {
        Self { delivery }
    }

    /// Seals the in-progress batch and delivers every queued batch, oldest
    /// first, while holding the destination's delivery lock.
    ///
    /// A batch leaves the queue only after its attempt has finished, so a
    /// flush dropped mid-request leaves it queued for the next one.
    pub async fn flush(&self, destination: &Destination, slot: &StreamSlot) -> FlushOutcome {
        let mut sequencer = slot.lock_delivery().await;
        slot.seal_current();

        let mut report = FlushReport::new(destination.clone());
        while let Some(batch) = slot.front() {
            let outcome = self.delivery.deliver(&mut sequencer, &batch).await;
            slot.pop_front();

            if outcome.accepted {
                slot.commit_delivered(&batch);
                report.delivered.push(batch);
                continue;
            }

            let reason = outcome.reason.unwrap_or_default();
            if outcome.retryable {
                let mut pending = vec![batch];
                pending.extend(slot.hand_back());
                warn!(
                    "Flush of {} stopped with {} batches pending: {}",
                    destination,
                    pending.len(),
                    reason
                );
                return FlushOutcome::RetryableFailure {
                    report,
                    pending,
                    reason,
                };
            }

            error!(
                "Dropping batch of {} events for {}: {}",
                batch.len(),
                destination,
                reason
            );
            report.rejected.push(RejectedBatch { batch, reason });
        }

        debug!(
            "Flushed {}: {} batches delivered, {} rejected",
            destination,
            report.delivered.len(),
            report.rejected.len()
        );
        report.into_outcome()
    }

    /// Delivers a batch previously handed back in a [`FlushOutcome`].
    pub async fn redeliver(&self, slot: &StreamSlot, batch: Batch) -> FlushOutcome {
        let destination = batch.destination().clone();
        let mut sequencer = slot.lock_delivery().await;
        let outcome = self.delivery.deliver(&mut sequencer, &batch).await;

        let mut report = FlushReport::new(destination);
        if outcome.accepted {
            slot.commit_delivered(&batch);
            report.delivered.push(batch);
            return report.into_outcome();
        }
        let reason = outcome.reason.unwrap_or_default();
        if outcome.retryable {
            return FlushOutcome::RetryableFailure {
                report,
                pending: vec![batch],
                reason,
            };
        }
        report.rejected.push(RejectedBatch { batch, reason });
        report.into_outcome()
    }
}
