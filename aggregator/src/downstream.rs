//! Client side of the downstream record services.

use crate::errors::{AggregatorError, TransportError};
use crate::protocol::Envelope;
use async_trait::async_trait;
use http::Method;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// One call to a downstream record service.
///
/// Implementations must be safe to share across the fan-out workers of a
/// request.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Sends `body` as JSON and returns the decoded envelope.
    ///
    /// A non-2xx HTTP status is not an error here: the envelope `code` is the
    /// semantic signal and is returned unmodified.
    async fn invoke(
        &self,
        method: Method,
        url: &Url,
        body: &JsonValue,
    ) -> Result<Envelope, TransportError>;
}

/// [`Downstream`] over a pooled `reqwest` client.
#[derive(Clone)]
pub struct HttpDownstream {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDownstream {
    /// `timeout` applies to the entire exchange, including reading the body.
    pub fn new(timeout: Duration) -> Result<Self, AggregatorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shipyard-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AggregatorError::HttpClient(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn invoke(
        &self,
        method: Method,
        url: &Url,
        body: &JsonValue,
    ) -> Result<Envelope, TransportError> {
        let request_failed = |e: reqwest::Error| TransportError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let exchange = async {
            let response = self
                .client
                .request(method, url.clone())
                .json(body)
                .send()
                .await
                .map_err(request_failed)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(request_failed)?;
            Ok::<_, TransportError>((status, bytes))
        };

        let (status, bytes) = timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout {
                url: url.to_string(),
            })??;

        if !status.is_success() {
            tracing::debug!(%url, %status, "Downstream answered with non-success status");
        }

        let value: JsonValue =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Envelope::from_json(value))
    }
}
