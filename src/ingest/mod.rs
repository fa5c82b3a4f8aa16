//! Streaming response ingestion
//!
//! [`StreamIngestor`] turns one generation response into an assistant
//! message: it appends a streaming placeholder, grows its text chunk by
//! chunk, splits off the trailing usage metadata and records the token
//! counts once the body ends.
//!
//! Usage counts come from the metadata JSON when it parses, otherwise from
//! the `x-input-tokens`/`x-output-tokens` response headers. Zero counts are
//! never recorded.
//!
//! A chat deleted while its reply is streaming makes every later store write
//! fail with `NotFound`; the ingestor stops at the first such failure and
//! never recreates the chat.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::PersonaChatError;
use crate::store::{ChatId, ChatStore, MessageId, NewMessage};
use crate::transport::{GenerationRequest, GenerationTransport};
use crate::usage::TokenCounts;

pub mod demux;
pub mod metrics;

use demux::{SentinelDemux, Utf8ChunkDecoder};
use metrics::StreamMetrics;

/// Where recorded token counts came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    /// The JSON object after the usage sentinel
    Metadata,
    /// The token-count response headers
    Headers,
}

impl UsageSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Headers => "headers",
        }
    }
}

/// How an ingest run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The body was read to the end
    Completed,
    /// Opening the request or reading the body failed; partial text is kept
    TransportFailed(String),
    /// The chat disappeared before or during the run
    ChatGone,
    /// The placeholder could not be appended, e.g. a turn was in progress
    Rejected(String),
}

impl IngestOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TransportFailed(_) => "transport",
            Self::ChatGone => "chat_gone",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Result of one ingest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Chat the reply was written to
    pub chat_id: ChatId,
    /// Assistant message id; `None` if no placeholder was appended
    pub message_id: Option<MessageId>,
    /// Final conversational text
    pub text: String,
    /// Counts written to the usage store, if any
    pub usage: Option<TokenCounts>,
    /// Source of [`IngestReport::usage`]
    pub usage_source: Option<UsageSource>,
    /// How the run ended
    pub outcome: IngestOutcome,
}

/// Live progress notifications for a UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// The placeholder message was appended
    Started {
        chat_id: ChatId,
        message_id: MessageId,
    },
    /// New conversational text was released
    Delta { chat_id: ChatId, text: String },
    /// The reply produced its first non-whitespace content
    ContentStarted { chat_id: ChatId },
    /// The run ended
    Finished {
        chat_id: ChatId,
        outcome: IngestOutcome,
    },
}

fn emit(events: Option<&mpsc::UnboundedSender<IngestEvent>>, event: IngestEvent) {
    if let Some(tx) = events {
        // A closed receiver only means nobody is watching.
        let _ = tx.send(event);
    }
}

/// Writes streamed generation responses into the chat store
#[derive(Clone)]
pub struct StreamIngestor {
    store: Arc<ChatStore>,
    transport: Arc<dyn GenerationTransport>,
}

impl std::fmt::Debug for StreamIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIngestor")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl StreamIngestor {
    /// Creates an ingestor writing to `store` and reading from `transport`
    pub fn new(store: Arc<ChatStore>, transport: Arc<dyn GenerationTransport>) -> Self {
        Self { store, transport }
    }

    /// Store the ingestor writes to
    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    /// Streams one reply into `chat_id`
    pub async fn run(&self, chat_id: ChatId, request: GenerationRequest) -> IngestReport {
        self.run_with_events(chat_id, request, None).await
    }

    /// Runs the ingest on its own task
    pub fn spawn(
        &self,
        chat_id: ChatId,
        request: GenerationRequest,
        events: Option<mpsc::UnboundedSender<IngestEvent>>,
    ) -> tokio::task::JoinHandle<IngestReport> {
        let ingestor = self.clone();
        tokio::spawn(async move { ingestor.run_with_events(chat_id, request, events).await })
    }

    /// Streams one reply into `chat_id`, reporting progress on `events`
    pub async fn run_with_events(
        &self,
        chat_id: ChatId,
        request: GenerationRequest,
        events: Option<mpsc::UnboundedSender<IngestEvent>>,
    ) -> IngestReport {
        let events = events.as_ref();
        let mut report = IngestReport {
            chat_id,
            message_id: None,
            text: String::new(),
            usage: None,
            usage_source: None,
            outcome: IngestOutcome::Completed,
        };

        let message_id = match self
            .store
            .append_message(chat_id, NewMessage::assistant_placeholder())
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, "Reply not started: {}", e);
                report.outcome = if e.is_not_found() {
                    IngestOutcome::ChatGone
                } else {
                    IngestOutcome::Rejected(e.to_string())
                };
                emit(
                    events,
                    IngestEvent::Finished {
                        chat_id,
                        outcome: report.outcome.clone(),
                    },
                );
                return report;
            }
        };
        report.message_id = Some(message_id);
        emit(
            events,
            IngestEvent::Started {
                chat_id,
                message_id,
            },
        );

        let mut metrics = StreamMetrics::new(request.character_name.clone());
        tracing::debug!(chat_id = %chat_id, message_id = %message_id, "Streaming reply");

        let mut writer = ReplyWriter {
            store: &self.store,
            chat_id,
            message_id,
            text: String::new(),
            streaming: true,
            gone: false,
            events,
        };

        let mut header_usage = TokenCounts::default();
        let mut demux = SentinelDemux::new();
        let mut failure = None;

        match self.transport.open(&request).await {
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, "Generation request failed: {}", e);
                failure = Some(e.to_string());
            }
            Ok(response) => {
                header_usage = response.header_usage;
                let mut decoder = Utf8ChunkDecoder::new();
                let mut body = response.body;

                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            metrics.record_chunk();
                            let released = demux.push(&decoder.decode(&bytes));
                            writer.extend(&released);
                            if writer.gone {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                chat_id = %chat_id,
                                chunks = metrics.chunks(),
                                "Reading reply body failed: {}",
                                e
                            );
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }

                if !writer.gone {
                    let mut tail = demux.push(&decoder.finish());
                    tail.push_str(&demux.finish());
                    if !tail.is_empty() {
                        writer.extend(&tail);
                    }
                }
            }
        }

        if !writer.gone && failure.is_none() {
            let (counts, source) = resolve_usage(&demux, header_usage);
            if !counts.is_zero() {
                match self
                    .store
                    .record_usage(chat_id, counts.input_tokens, counts.output_tokens)
                {
                    Ok(()) => {
                        metrics.record_tokens(
                            counts.input_tokens,
                            counts.output_tokens,
                            source.as_str(),
                        );
                        report.usage = Some(counts);
                        report.usage_source = Some(source);
                    }
                    Err(e) if e.is_not_found() => writer.gone = true,
                    Err(e) => tracing::warn!(chat_id = %chat_id, "Recording usage failed: {}", e),
                }
            }
        }

        if !writer.gone {
            if let Err(e) = self.store.finish_message(chat_id, message_id) {
                if e.is_not_found() {
                    writer.gone = true;
                } else {
                    tracing::warn!(chat_id = %chat_id, "Finalizing reply failed: {}", e);
                }
            }
        }

        report.outcome = if writer.gone {
            IngestOutcome::ChatGone
        } else if let Some(reason) = failure {
            IngestOutcome::TransportFailed(reason)
        } else {
            IngestOutcome::Completed
        };
        report.text = writer.text;

        match &report.outcome {
            IngestOutcome::Completed => metrics.record_completion(report.outcome.label()),
            other => metrics.record_failure(other.label()),
        }
        if report.outcome == IngestOutcome::ChatGone {
            tracing::info!(chat_id = %chat_id, "Chat removed while streaming, reply dropped");
        }
        tracing::debug!(
            chat_id = %chat_id,
            chars = report.text.len(),
            elapsed_ms = metrics.elapsed().as_millis() as u64,
            outcome = report.outcome.label(),
            "Reply finished"
        );

        emit(
            events,
            IngestEvent::Finished {
                chat_id,
                outcome: report.outcome.clone(),
            },
        );
        report
    }
}

/// Accumulates reply text and mirrors it into the store
struct ReplyWriter<'a> {
    store: &'a ChatStore,
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
    streaming: bool,
    gone: bool,
    events: Option<&'a mpsc::UnboundedSender<IngestEvent>>,
}

impl ReplyWriter<'_> {
    /// Appends released text, writes it to the store, then notifies
    fn extend(&mut self, released: &str) {
        if self.gone {
            return;
        }
        self.text.push_str(released);
        let content_started = self.streaming && !self.text.trim().is_empty();
        if content_started {
            self.streaming = false;
        }

        if let Err(e) =
            self.store
                .update_message_text(self.chat_id, self.message_id, &self.text, self.streaming)
        {
            if e.is_not_found() {
                self.gone = true;
                return;
            }
            tracing::warn!(chat_id = %self.chat_id, "Updating reply failed: {}", e);
        }

        if !released.is_empty() {
            emit(
                self.events,
                IngestEvent::Delta {
                    chat_id: self.chat_id,
                    text: released.to_string(),
                },
            );
        }
        if content_started {
            emit(
                self.events,
                IngestEvent::ContentStarted {
                    chat_id: self.chat_id,
                },
            );
        }
    }
}

/// Picks the counts to record: parsed metadata, else the header counts
fn resolve_usage(demux: &SentinelDemux, header_usage: TokenCounts) -> (TokenCounts, UsageSource) {
    if !demux.sentinel_seen() {
        return (header_usage, UsageSource::Headers);
    }
    match parse_metadata(demux.metadata()) {
        Ok(counts) => (counts, UsageSource::Metadata),
        Err(e) => {
            tracing::debug!("{}, using header counts", e);
            (header_usage, UsageSource::Headers)
        }
    }
}

/// Parses the usage metadata JSON object
///
/// # Errors
///
/// Returns [`PersonaChatError::MalformedMetadata`] if the text is not a JSON
/// object with non-negative integer counts
pub fn parse_metadata(text: &str) -> Result<TokenCounts, PersonaChatError> {
    serde_json::from_str::<TokenCounts>(text.trim())
        .map_err(|e| PersonaChatError::MalformedMetadata(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaId;
    use crate::transport::fake::{FakeReply, FakeTransport};

    fn setup() -> (Arc<ChatStore>, Arc<FakeTransport>, StreamIngestor, ChatId) {
        let store = Arc::new(ChatStore::in_memory());
        let transport = Arc::new(FakeTransport::new());
        let ingestor = StreamIngestor::new(store.clone(), transport.clone());
        let chat_id = store.create_chat(&PersonaId::new("p"));
        (store, transport, ingestor, chat_id)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("prompt", "Pirate")
    }

    #[test]
    fn test_parse_metadata_defaults_missing_fields() {
        assert_eq!(
            parse_metadata("{\"output_tokens\": 4}").unwrap(),
            TokenCounts::new(0, 4)
        );
        assert!(parse_metadata("{broken").is_err());
        assert!(parse_metadata("").is_err());
    }

    #[tokio::test]
    async fn test_completed_stream_records_metadata_usage() {
        let (store, transport, ingestor, chat_id) = setup();
        transport.push(FakeReply::chunks([
            "Ahoy",
            " matey__USAGE_METADATA__:",
            "{\"input_tokens\":5,\"output_tokens\":2}",
        ]));

        let report = ingestor.run(chat_id, request()).await;
        assert_eq!(report.outcome, IngestOutcome::Completed);
        assert_eq!(report.text, "Ahoy matey");
        assert_eq!(report.usage, Some(TokenCounts::new(5, 2)));
        assert_eq!(report.usage_source, Some(UsageSource::Metadata));

        let chat = store.chat(chat_id).unwrap();
        let reply = chat.last_message().unwrap();
        assert_eq!(reply.text, "Ahoy matey");
        assert!(!reply.streaming);
        assert_eq!(store.chat_usage(chat_id).total_input_tokens(), 5);
    }

    #[tokio::test]
    async fn test_zero_usage_is_not_recorded() {
        let (store, transport, ingestor, chat_id) = setup();
        transport.push(FakeReply::chunks(["quiet"]));
        let report = ingestor.run(chat_id, request()).await;
        assert_eq!(report.usage, None);
        assert!(store.chat_usage(chat_id).is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_finalizes_placeholder() {
        let (store, transport, ingestor, chat_id) = setup();
        transport.push(FakeReply::failure("connection refused"));
        let report = ingestor.run(chat_id, request()).await;
        assert!(matches!(report.outcome, IngestOutcome::TransportFailed(_)));
        assert!(!store.has_streaming_message(chat_id));
        assert_eq!(store.chat(chat_id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_placeholder_rejected_while_streaming() {
        let (store, transport, ingestor, chat_id) = setup();
        store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        let report = ingestor.run(chat_id, request()).await;
        assert!(matches!(report.outcome, IngestOutcome::Rejected(_)));
        assert_eq!(report.message_id, None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chat_sends_no_request() {
        let (_store, transport, ingestor, _chat_id) = setup();
        let report = ingestor.run(ChatId(1), request()).await;
        assert_eq!(report.outcome, IngestOutcome::ChatGone);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let (_store, transport, ingestor, chat_id) = setup();
        transport.push(FakeReply::chunks(["  ", "Hi"]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        ingestor.run_with_events(chat_id, request(), Some(tx)).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], IngestEvent::Started { .. }));
        assert_eq!(
            events[1],
            IngestEvent::Delta {
                chat_id,
                text: "  ".to_string()
            }
        );
        assert_eq!(
            events[2],
            IngestEvent::Delta {
                chat_id,
                text: "Hi".to_string()
            }
        );
        assert_eq!(events[3], IngestEvent::ContentStarted { chat_id });
        assert_eq!(
            events[4],
            IngestEvent::Finished {
                chat_id,
                outcome: IngestOutcome::Completed
            }
        );
    }
}
