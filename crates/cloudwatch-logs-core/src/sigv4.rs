// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS Signature Version 4 for CloudWatch Logs requests.
//!
//! Credentials come from the default AWS provider chain (environment,
//! profile, web identity, container and instance metadata). When a role is
//! configured it is assumed through STS on top of that chain. Credentials
//! are cached until shortly before they expire.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::header::{HeaderName, HeaderValue, ToStrError};
use tracing::{debug, info};

use crate::cloudwatch::{SignRequest, Unsigned};
use crate::config::Config;
use crate::errors::{ApiError, ConfigError};

const SIGNING_NAME: &str = "logs";
const ROLE_SESSION_NAME: &str = "cloudwatch-logs-forwarder";
const REFRESH_BEFORE_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Picks the signer for a configuration.
///
/// Requests to an overridden endpoint go out unsigned unless a role is
/// configured; everything else is signed.
pub async fn request_signer(config: &Config) -> Result<Arc<dyn SignRequest>, ConfigError> {
    if config.endpoint.is_some() && config.role_arn.is_none() {
        info!(
            "Sending unsigned requests to custom endpoint {}",
            config.endpoint()
        );
        return Ok(Arc::new(Unsigned));
    }
    Ok(Arc::new(SigV4Signer::from_config(config).await?))
}

#[derive(Debug)]
pub struct SigV4Signer {
    region: String,
    provider: SharedCredentialsProvider,
    cached: tokio::sync::Mutex<Option<Credentials>>,
}

impl SigV4Signer {
    pub fn new(region: impl Into<String>, provider: SharedCredentialsProvider) -> Self {
        Self {
            region: region.into(),
            provider,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let region = Region::new(config.region.clone());
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let provider = match &config.role_arn {
            Some(role_arn) => {
                info!("Assuming role {} for CloudWatch Logs requests", role_arn);
                let assume_role = AssumeRoleProvider::builder(role_arn)
                    .session_name(ROLE_SESSION_NAME)
                    .region(region)
                    .configure(&sdk_config)
                    .build()
                    .await;
                SharedCredentialsProvider::new(assume_role)
            }
            None => sdk_config
                .credentials_provider()
                .ok_or(ConfigError::MissingCredentials)?,
        };
        Ok(Self::new(config.region.clone(), provider))
    }

    async fn credentials(&self) -> Result<Credentials, ApiError> {
        let mut cached = self.cached.lock().await;
        if let Some(credentials) = cached.as_ref() {
            if !expires_soon(credentials, SystemTime::now()) {
                return Ok(credentials.clone());
            }
        }

        let credentials = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| ApiError::Transient(format!("could not load AWS credentials: {e}")))?;
        debug!("Loaded AWS credentials, expiry {:?}", credentials.expiry());
        *cached = Some(credentials.clone());
        Ok(credentials)
    }
}

#[async_trait]
impl SignRequest for SigV4Signer {
    async fn sign(&self, request: &mut reqwest::Request) -> Result<(), ApiError> {
        let credentials = self.credentials().await?;
        sign_request(request, credentials, &self.region, SystemTime::now())
    }
}

fn expires_soon(credentials: &Credentials, now: SystemTime) -> bool {
    credentials
        .expiry()
        .is_some_and(|expiry| expiry <= now + REFRESH_BEFORE_EXPIRY)
}

fn sign_request(
    request: &mut reqwest::Request,
    credentials: Credentials,
    region: &str,
    time: SystemTime,
) -> Result<(), ApiError> {
    let identity: Identity = credentials.into();
    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SIGNING_NAME)
        .time(time)
        .settings(SigningSettings::default())
        .build()
        .map_err(signing_error)?
        .into();

    let body = request
        .body()
        .and_then(reqwest::Body::as_bytes)
        .unwrap_or_default();
    let headers = request
        .headers()
        .iter()
        .map(|(name, value)| Ok((name.as_str(), value.to_str()?)))
        .collect::<Result<Vec<_>, ToStrError>>()
        .map_err(signing_error)?;
    let signable = SignableRequest::new(
        request.method().as_str(),
        request.url().as_str(),
        headers.into_iter(),
        SignableBody::Bytes(body),
    )
    .map_err(signing_error)?;
    let (instructions, _signature) = sign(signable, &params)
        .map_err(signing_error)?
        .into_parts();

    for (name, value) in instructions.headers() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(signing_error)?;
        let value = HeaderValue::from_str(value).map_err(signing_error)?;
        request.headers_mut().insert(name, value);
    }
    Ok(())
}

// Signing the same request again fails the same way.
fn signing_error(error: impl Display) -> ApiError {
    ApiError::Rejected {
        kind: "SigningError".to_string(),
        message: error.to_string(),
    }
}
