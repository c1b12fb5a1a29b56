// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::trace;

use crate::record::Destination;

/// Holds the upload sequence token PutLogEvents requires for one stream.
///
/// A fresh stream has no token. Every append that the service answers,
/// whether it accepts the batch or rejects the token, tells us the token to
/// present next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSequencer {
    destination: Destination,
    token: Option<String>,
    updates: u64,
}

impl StreamSequencer {
    #[must_use]
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            token: None,
            updates: 0,
        }
    }

    #[must_use]
    pub fn with_token(destination: Destination, token: impl Into<String>) -> Self {
        Self {
            destination,
            token: Some(token.into()),
            updates: 0,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    #[must_use]
    pub fn current_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn update(&mut self, token: Option<String>) {
        trace!(
            "Sequence token for {} updated to {:?}",
            self.destination,
            token
        );
        self.token = token;
        self.updates += 1;
    }

    /// Number of times the token has been replaced.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates
    }
}
