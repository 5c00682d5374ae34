//! HTTP liveness probe.
//!
//! Deployments that run the relay on behalf of a game session point
//! `--liveness-url` at an endpoint that answers `{"code":200,"alive":true}`
//! while the session lasts.  Anything else (an error, a different body, no
//! answer within the timeout) ends the relay.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::trace;

use crate::application::{LivenessProbe, ProbeError, LIVENESS_PAYLOAD};

/// Upper bound on one liveness request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpLivenessProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpLivenessProbe {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Body(e.to_string()))?;

        trace!(url = %self.url, %body, "liveness response");
        // The HTTP status is not consulted; the body alone decides.
        if body == LIVENESS_PAYLOAD {
            Ok(())
        } else {
            Err(ProbeError::NotAlive { body })
        }
    }
}
