//! Scripted in-process transport for tests
//!
//! [`FakeTransport`] answers each [`GenerationTransport::open`] call with the
//! next queued [`FakeReply`] and records every request it receives.
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use personachat::transport::fake::{FakeReply, FakeTransport};
//! use personachat::transport::{GenerationRequest, GenerationTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let transport = FakeTransport::new();
//! transport.push(FakeReply::chunks(["Hel", "lo"]).with_header_usage(3, 1));
//!
//! let mut response = transport
//!     .open(&GenerationRequest::new("prompt", "Pirate"))
//!     .await
//!     .unwrap();
//! assert_eq!(response.header_usage.input_tokens, 3);
//! let first = response.body.next().await.unwrap().unwrap();
//! assert_eq!(&first[..], b"Hel");
//! assert_eq!(transport.requests().len(), 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{PersonaChatError, Result};
use crate::transport::{GenerationRequest, GenerationResponse, GenerationTransport};
use crate::usage::TokenCounts;

/// One body item of a scripted reply; `Err` becomes a body read failure
pub type FakeChunk = std::result::Result<Bytes, String>;

#[derive(Debug)]
enum ReplyBody {
    Chunks(Vec<FakeChunk>),
    Channel(mpsc::UnboundedReceiver<FakeChunk>),
    Fail(String),
}

/// Scripted answer to one request
#[derive(Debug)]
pub struct FakeReply {
    header_usage: TokenCounts,
    body: ReplyBody,
}

impl FakeReply {
    /// A reply whose body yields the given chunks, in order
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            header_usage: TokenCounts::default(),
            body: ReplyBody::Chunks(
                chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::copy_from_slice(c.as_ref())))
                    .collect(),
            ),
        }
    }

    /// A reply that yields the chunks, then fails the body read
    pub fn chunks_then_error<I, S>(chunks: I, error: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut reply = Self::chunks(chunks);
        if let ReplyBody::Chunks(items) = &mut reply.body {
            items.push(Err(error.into()));
        }
        reply
    }

    /// A reply whose chunks are fed by the returned sender
    ///
    /// The body ends when the sender is dropped.
    pub fn channel() -> (Self, mpsc::UnboundedSender<FakeChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                header_usage: TokenCounts::default(),
                body: ReplyBody::Channel(rx),
            },
            tx,
        )
    }

    /// A request that fails before any response arrives
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            header_usage: TokenCounts::default(),
            body: ReplyBody::Fail(error.into()),
        }
    }

    /// Sets the counts announced in the response headers
    pub fn with_header_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.header_usage = TokenCounts::new(input_tokens, output_tokens);
        self
    }
}

/// In-process [`GenerationTransport`] answering from a reply queue
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<FakeReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeTransport {
    /// Creates a transport with an empty reply queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for a later request
    pub fn push(&self, reply: FakeReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn chunk_result(chunk: FakeChunk) -> Result<Bytes> {
    chunk.map_err(|e| PersonaChatError::TransportFailure(e).into())
}

#[async_trait]
impl GenerationTransport for FakeTransport {
    async fn open(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| PersonaChatError::TransportFailure("no scripted reply".to_string()))?;

        let body: crate::transport::ChunkStream = match reply.body {
            ReplyBody::Fail(error) => return Err(PersonaChatError::TransportFailure(error).into()),
            ReplyBody::Chunks(chunks) => Box::pin(futures::stream::iter(chunks).map(chunk_result)),
            ReplyBody::Channel(rx) => Box::pin(UnboundedReceiverStream::new(rx).map(chunk_result)),
        };

        Ok(GenerationResponse {
            header_usage: reply.header_usage,
            body,
        })
    }
}
