// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock request signers

use async_trait::async_trait;
use cloudwatch_logs_core::cloudwatch::SignRequest;
use cloudwatch_logs_core::errors::ApiError;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Signer that stamps a fixed authorization header and counts requests
#[derive(Debug, Default)]
pub struct MockSigner {
    pub signed: AtomicUsize,
}

impl MockSigner {
    pub const AUTHORIZATION: &'static str = "mock-signature";

    #[allow(dead_code)]
    pub fn signed(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignRequest for MockSigner {
    async fn sign(&self, request: &mut reqwest::Request) -> Result<(), ApiError> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static(Self::AUTHORIZATION));
        Ok(())
    }
}

/// Signer whose credentials are never available
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FailingSigner;

#[async_trait]
impl SignRequest for FailingSigner {
    async fn sign(&self, _request: &mut reqwest::Request) -> Result<(), ApiError> {
        Err(ApiError::Transient("credentials unavailable".to_string()))
    }
}
