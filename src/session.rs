//! Chat session controller
//!
//! [`ChatSession`] runs one user turn at a time against the active chat:
//! it validates the input, appends the user message, builds the prompt and
//! hands the reply to the [`StreamIngestor`]. Its phase is published on a
//! `watch` channel so a UI can follow `Idle -> Sending -> Streaming -> Idle`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::PersonaChatError;
use crate::ingest::{IngestEvent, IngestReport, StreamIngestor};
use crate::persona::{PersonaCatalog, PersonaId};
use crate::prompt::build_request;
use crate::store::{ChatId, ChatStore, NewMessage};

/// Phase of the session's current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for input
    Idle,
    /// User message appended, request being prepared
    Sending,
    /// Reply is streaming in
    Streaming,
}

/// Why a turn was not started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Input was empty after trimming
    EmptyInput,
    /// No persona is selected
    NoPersona,
    /// The selected persona is not in the catalog
    UnknownPersona(PersonaId),
    /// No chat is selected, or it no longer exists
    NoActiveChat,
    /// The active chat is still receiving a reply
    TurnInProgress,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "nothing to send"),
            Self::NoPersona => write!(f, "no persona selected"),
            Self::UnknownPersona(id) => write!(f, "unknown persona: {}", id),
            Self::NoActiveChat => write!(f, "no active chat"),
            Self::TurnInProgress => write!(f, "a reply is still streaming"),
        }
    }
}

/// Result of [`ChatSession::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing was sent and no state changed
    Dropped(DropReason),
    /// The turn ran; the report says how the reply ended
    Completed(IngestReport),
}

/// Drives user turns for the store's active persona and chat
pub struct ChatSession {
    store: Arc<ChatStore>,
    catalog: Arc<PersonaCatalog>,
    ingestor: StreamIngestor,
    phase: watch::Sender<SessionPhase>,
    input: String,
}

impl ChatSession {
    /// Creates an idle session with an empty input buffer
    pub fn new(catalog: Arc<PersonaCatalog>, ingestor: StreamIngestor) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        Self {
            store: ingestor.store().clone(),
            catalog,
            ingestor,
            phase,
            input: String::new(),
        }
    }

    /// Store the session works on
    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    /// Persona catalog
    pub fn catalog(&self) -> &PersonaCatalog {
        &self.catalog
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes phase changes
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Replaces the input buffer
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Current input buffer
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Selects a persona from the catalog
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the catalog has no such persona
    pub fn select_persona(&self, persona_id: &PersonaId) -> Result<(), PersonaChatError> {
        if !self.catalog.contains(persona_id) {
            return Err(PersonaChatError::NotFound(format!("persona {}", persona_id)));
        }
        self.store.select_persona(persona_id);
        Ok(())
    }

    /// Creates a chat for the active persona and makes it active
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::InvalidInput` if no persona is selected
    pub fn new_chat(&self) -> Result<ChatId, PersonaChatError> {
        let persona_id = self
            .store
            .active_persona_id()
            .ok_or_else(|| PersonaChatError::InvalidInput("no persona selected".to_string()))?;
        Ok(self.store.create_chat(&persona_id))
    }

    /// Sends the input buffer as the next user turn
    pub async fn submit(&mut self) -> TurnOutcome {
        self.submit_with_events(None).await
    }

    /// Sends the input buffer, forwarding reply progress to `events`
    pub async fn submit_with_events(
        &mut self,
        events: Option<mpsc::UnboundedSender<IngestEvent>>,
    ) -> TurnOutcome {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return TurnOutcome::Dropped(DropReason::EmptyInput);
        }
        let Some(persona_id) = self.store.active_persona_id() else {
            return TurnOutcome::Dropped(DropReason::NoPersona);
        };
        let Some(persona) = self.catalog.get(&persona_id).cloned() else {
            return TurnOutcome::Dropped(DropReason::UnknownPersona(persona_id));
        };
        let Some(chat) = self.store.get_active_chat() else {
            return TurnOutcome::Dropped(DropReason::NoActiveChat);
        };
        let chat_id = chat.id;
        if self.store.turn_in_progress(chat_id) {
            return TurnOutcome::Dropped(DropReason::TurnInProgress);
        }

        self.phase.send_replace(SessionPhase::Sending);
        let message = match NewMessage::user(&text) {
            Ok(message) => message,
            Err(_) => {
                self.phase.send_replace(SessionPhase::Idle);
                return TurnOutcome::Dropped(DropReason::EmptyInput);
            }
        };
        if let Err(e) = self.store.append_message(chat_id, message) {
            tracing::warn!(chat_id = %chat_id, "User message not appended: {}", e);
            self.phase.send_replace(SessionPhase::Idle);
            let reason = match e {
                PersonaChatError::TurnInProgress(_) => DropReason::TurnInProgress,
                _ => DropReason::NoActiveChat,
            };
            return TurnOutcome::Dropped(reason);
        }
        self.input.clear();

        let Some(chat) = self.store.chat(chat_id) else {
            self.phase.send_replace(SessionPhase::Idle);
            return TurnOutcome::Dropped(DropReason::NoActiveChat);
        };
        let request = build_request(&persona, &chat.messages);

        self.phase.send_replace(SessionPhase::Streaming);
        let report = self
            .ingestor
            .run_with_events(chat_id, request, events)
            .await;
        self.phase.send_replace(SessionPhase::Idle);

        TurnOutcome::Completed(report)
    }
}
