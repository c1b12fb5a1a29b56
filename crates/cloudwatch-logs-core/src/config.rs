// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::accumulator::{OrderingConfig, OutOfOrderPolicy};
use crate::batch::BatchLimits;
use crate::cloudwatch::CloudWatchLogsClient;
use crate::constants::{DEFAULT_CLOCK_SKEW_TOLERANCE_MS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::engine::EngineConfig;
use crate::errors::ConfigError;
use crate::resolver::{NamingConfig, StreamNaming};
use crate::template::NameTemplate;

/// Prefix of the environment variables read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "CLOUDWATCH_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_group_name: String,
    /// Fixed stream name. Exclusive with `log_stream_prefix`.
    pub log_stream_name: Option<String>,
    /// Stream name is this prefix followed by the record tag.
    pub log_stream_prefix: Option<String>,
    pub region: String,
    /// Role to assume. Resolved by the request signer.
    pub role_arn: Option<String>,
    /// Record field used as the message instead of the whole record.
    pub log_key: Option<String>,
    pub auto_create_group: bool,
    /// Overrides the regional service endpoint.
    pub endpoint: Option<String>,
    pub out_of_order_policy: OutOfOrderPolicy,
    pub clock_skew_tolerance_ms: i64,
    pub https_proxy: Option<String>,
    /// Timeout for each API request, in seconds
    pub request_timeout_secs: u64,
}

impl Config {
    /// Reads the plugin keys through `lookup`, the host's config accessor.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let out_of_order_policy = match get("out_of_order_policy") {
            Some(value) => value
                .parse::<OutOfOrderPolicy>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "out_of_order_policy",
                    value,
                })?,
            None => OutOfOrderPolicy::default(),
        };

        let config = Config {
            log_group_name: get("log_group_name").unwrap_or_default(),
            log_stream_name: get("log_stream_name"),
            log_stream_prefix: get("log_stream_prefix"),
            region: get("region").unwrap_or_default(),
            role_arn: get("role_arn"),
            log_key: get("log_key"),
            auto_create_group: parse_bool("auto_create_group", get("auto_create_group"), false)?,
            endpoint: get("endpoint"),
            out_of_order_policy,
            clock_skew_tolerance_ms: parse_number(
                "clock_skew_tolerance_ms",
                get("clock_skew_tolerance_ms"),
                DEFAULT_CLOCK_SKEW_TOLERANCE_MS,
            )?,
            https_proxy: get("https_proxy"),
            request_timeout_secs: parse_number(
                "request_timeout_secs",
                get("request_timeout_secs"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads `CLOUDWATCH_<KEY>` environment variables, e.g.
    /// `CLOUDWATCH_LOG_GROUP_NAME`. The region falls back to `AWS_REGION`.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| {
            let value = env::var(format!("{ENV_PREFIX}{}", key.to_uppercase())).ok();
            match key {
                "region" => value
                    .filter(|region| !region.trim().is_empty())
                    .or_else(|| env::var("AWS_REGION").ok()),
                "https_proxy" => value.or_else(|| env::var("HTTPS_PROXY").ok()),
                _ => value,
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_group_name.is_empty() {
            return Err(ConfigError::MissingKey("log_group_name"));
        }
        match (&self.log_stream_name, &self.log_stream_prefix) {
            (None, None) => return Err(ConfigError::MissingStreamNaming),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingStreamNaming),
            _ => {}
        }
        if self.region.is_empty() {
            return Err(ConfigError::MissingKey("region"));
        }
        if self.clock_skew_tolerance_ms < 0 {
            return Err(ConfigError::InvalidValue {
                key: "clock_skew_tolerance_ms",
                value: self.clock_skew_tolerance_ms.to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs",
                value: "0".to_string(),
            });
        }
        self.naming()?;
        Ok(())
    }

    /// The service endpoint, regional unless overridden.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| CloudWatchLogsClient::regional_endpoint(&self.region))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn naming(&self) -> Result<NamingConfig, ConfigError> {
        let stream = match (&self.log_stream_name, &self.log_stream_prefix) {
            (Some(name), None) => StreamNaming::Template(NameTemplate::parse(name)?),
            (None, Some(prefix)) => StreamNaming::Prefix(prefix.clone()),
            (None, None) => return Err(ConfigError::MissingStreamNaming),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingStreamNaming),
        };
        Ok(NamingConfig {
            group: NameTemplate::parse(&self.log_group_name)?,
            stream,
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            naming: self.naming()?,
            auto_create_group: self.auto_create_group,
            limits: BatchLimits::default(),
            ordering: OrderingConfig {
                policy: self.out_of_order_policy,
                skew_tolerance_ms: self.clock_skew_tolerance_ms,
            },
        })
    }
}

fn parse_bool(key: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" => Ok(true),
        "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
