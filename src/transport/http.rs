//! HTTP generation transport
//!
//! POSTs the JSON request to the generation endpoint and exposes the chunked
//! response body as it arrives.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::error::{PersonaChatError, Result};
use crate::transport::{
    parse_token_header, GenerationRequest, GenerationResponse, GenerationTransport,
    INPUT_TOKENS_HEADER, OUTPUT_TOKENS_HEADER,
};
use crate::usage::TokenCounts;

/// Streaming HTTP transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpTransport {
    /// Creates a transport for an endpoint
    ///
    /// # Arguments
    ///
    /// * `endpoint` - URL the requests are POSTed to
    /// * `connect_timeout` - Limit for establishing the connection
    /// * `request_timeout` - Limit for the whole exchange, body included;
    ///   `None` lets a stream run as long as the server keeps it open
    ///
    /// # Errors
    ///
    /// Returns [`PersonaChatError::TransportFailure`] if the HTTP client
    /// cannot be built
    pub fn new(
        endpoint: url::Url,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            PersonaChatError::TransportFailure(format!("failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client, endpoint })
    }

    /// Endpoint this transport posts to
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    async fn open(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        tracing::debug!(
            endpoint = %self.endpoint,
            character = %request.character_name,
            prompt_len = request.prompt.len(),
            "Sending generation request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| PersonaChatError::TransportFailure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PersonaChatError::TransportFailure(format!(
                "endpoint returned status {}",
                status
            ))
            .into());
        }

        let header = |name: &str| {
            parse_token_header(
                response
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok()),
            )
        };
        let header_usage =
            TokenCounts::new(header(INPUT_TOKENS_HEADER), header(OUTPUT_TOKENS_HEADER));

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                anyhow::Error::from(PersonaChatError::TransportFailure(format!(
                    "failed to read body: {}",
                    e
                )))
            })
        });

        Ok(GenerationResponse {
            header_usage,
            body: Box::pin(body),
        })
    }
}
