// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps record tags to log destinations and makes sure they exist.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::api::LogsApi;
use crate::constants::MAX_NAME_LENGTH;
use crate::errors::{ApiError, ResolveError};
use crate::record::Destination;
use crate::template::NameTemplate;

/// How stream names are derived from tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNaming {
    /// Rendered from a template, usually a fixed name.
    Template(NameTemplate),
    /// The prefix followed by the record tag.
    Prefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConfig {
    pub group: NameTemplate,
    pub stream: StreamNaming,
}

pub struct DestinationResolver {
    naming: NamingConfig,
    auto_create_group: bool,
    api: Arc<dyn LogsApi>,
    ensured: Mutex<HashMap<Destination, Arc<OnceCell<()>>>>,
}

impl DestinationResolver {
    pub fn new(naming: NamingConfig, auto_create_group: bool, api: Arc<dyn LogsApi>) -> Self {
        Self {
            naming,
            auto_create_group,
            api,
            ensured: Mutex::new(HashMap::new()),
        }
    }

    /// Renders the destination for `tag` without touching the network.
    pub fn destination_for(&self, tag: &str) -> Result<Destination, ResolveError> {
        let group = self.naming.group.render(tag)?;
        let stream = match &self.naming.stream {
            StreamNaming::Template(template) => template.render(tag)?,
            StreamNaming::Prefix(prefix) => format!("{prefix}{tag}"),
        };
        validate_name("group", &group, tag)?;
        validate_name("stream", &stream, tag)?;
        if stream.contains([':', '*']) {
            return Err(ResolveError::InvalidName {
                kind: "stream",
                name: stream,
                tag: tag.to_string(),
                reason: "must not contain ':' or '*'",
            });
        }
        Ok(Destination::new(group, stream))
    }

    /// Renders the destination for `tag` and ensures its group and stream
    /// exist.
    pub async fn resolve(&self, tag: &str) -> Result<Destination, ResolveError> {
        let destination = self.destination_for(tag)?;
        self.ensure(&destination).await?;
        Ok(destination)
    }

    /// Runs the creation sequence for `destination` once per process.
    ///
    /// Concurrent callers wait on the same attempt. A failed attempt is not
    /// remembered, so the next caller tries again.
    pub async fn ensure(&self, destination: &Destination) -> Result<(), ResolveError> {
        let cell = {
            let mut ensured = self.ensured.lock().unwrap_or_else(PoisonError::into_inner);
            ensured.entry(destination.clone()).or_default().clone()
        };
        cell.get_or_try_init(|| self.create(destination))
            .await
            .map(|_| ())
    }

    #[must_use]
    pub fn is_ensured(&self, destination: &Destination) -> bool {
        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .is_some_and(|cell| cell.initialized())
    }

    async fn create(&self, destination: &Destination) -> Result<(), ResolveError> {
        let api_error = |source: ApiError| ResolveError::Api {
            destination: destination.clone(),
            source,
        };

        match self.api.create_log_stream(destination).await {
            Ok(()) => {
                info!("Created log stream {}", destination);
                return Ok(());
            }
            Err(ApiError::ResourceAlreadyExists(_)) => {
                debug!("Log stream {} already exists", destination);
                return Ok(());
            }
            Err(ApiError::ResourceNotFound(_)) => {}
            Err(e) => return Err(api_error(e)),
        }

        if !self.auto_create_group {
            return Err(ResolveError::GroupMissing {
                group: destination.group.clone(),
            });
        }

        info!("Log group {} not found, creating it", destination.group);
        match self.api.create_log_group(&destination.group).await {
            Ok(()) | Err(ApiError::ResourceAlreadyExists(_)) => {}
            Err(e) => return Err(api_error(e)),
        }
        match self.api.create_log_stream(destination).await {
            Ok(()) => {
                info!("Created log stream {}", destination);
                Ok(())
            }
            Err(ApiError::ResourceAlreadyExists(_)) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }
}

fn validate_name(kind: &'static str, name: &str, tag: &str) -> Result<(), ResolveError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.len() > MAX_NAME_LENGTH {
        "must be at most 512 bytes"
    } else {
        return Ok(());
    };
    Err(ResolveError::InvalidName {
        kind,
        name: name.to_string(),
        tag: tag.to_string(),
        reason,
    })
}
