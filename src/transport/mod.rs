//! Generation transport abstraction and implementations
//!
//! A [`GenerationTransport`] opens one streamed generation request and hands
//! back the response headers' token counts together with the raw body as a
//! stream of byte chunks. Concrete implementations:
//!
//! - [`http::HttpTransport`] -- POSTs the request to the configured endpoint
//!   with `reqwest` and streams the chunked body.
//! - [`fake::FakeTransport`] -- scripted in-process replies for tests.
//!
//! Decoding the body (UTF-8, usage sentinel) is the ingestor's job; a
//! transport only moves bytes.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::usage::TokenCounts;

pub mod fake;
pub mod http;

/// Response header carrying the prompt token count
pub const INPUT_TOKENS_HEADER: &str = "x-input-tokens";

/// Response header carrying the completion token count
pub const OUTPUT_TOKENS_HEADER: &str = "x-output-tokens";

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fully rendered prompt
    pub prompt: String,
    /// Display name of the persona that should answer
    pub character_name: String,
}

impl GenerationRequest {
    /// Creates a request
    pub fn new(prompt: impl Into<String>, character_name: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            character_name: character_name.into(),
        }
    }
}

/// Raw response body, one item per received chunk
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An opened generation response
pub struct GenerationResponse {
    /// Token counts announced in the response headers (0 when absent)
    pub header_usage: TokenCounts,
    /// Body chunks in arrival order
    pub body: ChunkStream,
}

impl fmt::Debug for GenerationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationResponse")
            .field("header_usage", &self.header_usage)
            .finish_non_exhaustive()
    }
}

/// Abstraction over the generation endpoint
///
/// Used polymorphically through `Arc<dyn GenerationTransport>` so tests can
/// swap in [`fake::FakeTransport`].
#[async_trait::async_trait]
pub trait GenerationTransport: Send + Sync + fmt::Debug {
    /// Sends the request and returns once the response headers arrived
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PersonaChatError::TransportFailure`] if the
    /// request cannot be sent or the endpoint answers with a non-success
    /// status.
    async fn open(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

/// Parses a token-count header value; absent or non-numeric values give 0
///
/// # Examples
///
/// ```
/// use personachat::transport::parse_token_header;
///
/// assert_eq!(parse_token_header(Some(" 12 ")), 12);
/// assert_eq!(parse_token_header(Some("many")), 0);
/// assert_eq!(parse_token_header(None), 0);
/// ```
pub fn parse_token_header(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}
