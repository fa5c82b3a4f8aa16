//! Persisted, keyed chat store
//!
//! [`ChatStore`] is the single source of truth for conversations: chats per
//! persona (most-recent-first), their transcripts, per-chat token usage and
//! the transient session selection (active persona, active chat, sidebar
//! flag).
//!
//! # Concurrency
//!
//! The store is shared as `Arc<ChatStore>` and every operation takes `&self`.
//! Operations are synchronous and hold the internal lock only for their own
//! duration, never across an `.await`. Chats are stored as `Arc<Chat>`; a
//! write clones only the chat it touches, so `Arc<Chat>` values handed out
//! to readers are stable snapshots and streams writing to different chats
//! never disturb each other.
//!
//! # Persistence
//!
//! When opened on a path, the container is written to a `sled` snapshot after
//! every structural mutation and whenever a streaming message is finished.
//! Per-chunk text updates only mark the state dirty. The state is captured
//! under the lock and serialized and flushed after the lock is released;
//! a capture older than the last one written is skipped.
//!
//! # Turns
//!
//! Appending a streaming placeholder claims the chat for that reply until
//! [`ChatStore::finish_message`] or [`ChatStore::delete_chat`] releases it.
//! While claimed, every append to the chat is refused with
//! `PersonaChatError::TurnInProgress`, whatever the placeholder's text or
//! streaming flag has become.

use crate::error::{PersonaChatError, StoreResult};
use crate::persona::PersonaId;
use crate::usage::{bucket, Granularity, UsagePoint, UsageRecord, UsageTotals};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod snapshot;
pub mod types;

pub use snapshot::{Snapshot, SnapshotStore, SNAPSHOT_KEY};
pub use types::{Chat, ChatId, Message, MessageId, NewMessage, Sender};

/// Store behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Drop a chat's usage record when the chat is deleted
    pub purge_usage_on_delete: bool,
}

/// Transient selection state; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Persona whose chats are being shown
    pub active_persona_id: Option<PersonaId>,
    /// Chat receiving the next turn; always owned by the active persona
    pub active_chat_id: Option<ChatId>,
    /// Whether the chat list is expanded
    pub sidebar_open: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active_persona_id: None,
            active_chat_id: None,
            sidebar_open: true,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    chats: HashMap<PersonaId, Vec<Arc<Chat>>>,
    owners: HashMap<ChatId, PersonaId>,
    token_usage: HashMap<ChatId, UsageRecord>,
    session: SessionState,
    last_chat_id: u64,
    /// Reply currently being received per chat
    in_flight: HashMap<ChatId, MessageId>,
    dirty: bool,
    capture_seq: u64,
}

/// State captured under the lock, written after the lock is released
struct PendingWrite {
    seq: u64,
    chats: Vec<(PersonaId, Vec<Arc<Chat>>)>,
    token_usage: Vec<(ChatId, UsageRecord)>,
    last_chat_id: u64,
}

impl PendingWrite {
    fn snapshot(&self) -> snapshot::SnapshotRef<'_> {
        snapshot::SnapshotRef {
            chats: self
                .chats
                .iter()
                .map(|(persona, chats)| (persona, chats.iter().map(Arc::as_ref).collect()))
                .collect(),
            token_usage: self.token_usage.iter().map(|(id, r)| (*id, r)).collect(),
            last_chat_id: self.last_chat_id,
        }
    }
}

impl StoreState {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = StoreState {
            last_chat_id: snapshot.last_chat_id,
            ..StoreState::default()
        };

        for (persona_id, chats) in snapshot.chats {
            let mut list = Vec::with_capacity(chats.len());
            for mut chat in chats {
                if state.owners.contains_key(&chat.id) {
                    tracing::warn!(chat_id = %chat.id, "Duplicate chat id in snapshot, skipped");
                    continue;
                }
                // A stream cannot outlive the process that started it.
                for message in chat.messages.iter_mut().filter(|m| m.streaming) {
                    message.streaming = false;
                }
                chat.persona_id = persona_id.clone();
                state.last_chat_id = state.last_chat_id.max(chat.id.0);
                state.owners.insert(chat.id, persona_id.clone());
                list.push(Arc::new(chat));
            }
            state.chats.insert(persona_id, list);
        }

        state.token_usage = snapshot.token_usage.into_iter().collect();
        state
    }

    /// Clones the persisted part of the state; chats are shared, not copied
    fn capture(&mut self) -> PendingWrite {
        self.capture_seq += 1;
        self.dirty = false;
        PendingWrite {
            seq: self.capture_seq,
            chats: self
                .chats
                .iter()
                .map(|(persona, chats)| (persona.clone(), chats.clone()))
                .collect(),
            token_usage: self
                .token_usage
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect(),
            last_chat_id: self.last_chat_id,
        }
    }

    fn next_chat_id(&mut self) -> ChatId {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_chat_id = now.max(self.last_chat_id + 1);
        ChatId(self.last_chat_id)
    }

    fn chat_mut(&mut self, chat_id: ChatId) -> StoreResult<&mut Chat> {
        let persona_id = self
            .owners
            .get(&chat_id)
            .ok_or_else(|| PersonaChatError::NotFound(format!("chat {}", chat_id)))?;
        let chat = self
            .chats
            .get_mut(persona_id)
            .and_then(|list| list.iter_mut().find(|c| c.id == chat_id))
            .ok_or_else(|| PersonaChatError::NotFound(format!("chat {}", chat_id)))?;
        Ok(Arc::make_mut(chat))
    }

    fn chat(&self, chat_id: ChatId) -> Option<&Arc<Chat>> {
        let persona_id = self.owners.get(&chat_id)?;
        self.chats
            .get(persona_id)?
            .iter()
            .find(|c| c.id == chat_id)
    }
}

/// Process-wide keyed container for personas' chats and usage
pub struct ChatStore {
    state: RwLock<StoreState>,
    snapshots: Option<SnapshotStore>,
    /// Sequence of the last capture written to disk
    written_seq: Mutex<u64>,
    options: StoreOptions,
}

impl ChatStore {
    /// Creates a store that lives only in memory
    ///
    /// # Examples
    ///
    /// ```
    /// use personachat::persona::PersonaId;
    /// use personachat::store::ChatStore;
    ///
    /// let store = ChatStore::in_memory();
    /// let persona = PersonaId::new("einstein");
    /// let chat_id = store.create_chat(&persona);
    /// assert_eq!(store.active_chat_id(), Some(chat_id));
    /// assert_eq!(store.list_chats(&persona).len(), 1);
    /// ```
    pub fn in_memory() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Creates an in-memory store with explicit options
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshots: None,
            written_seq: Mutex::new(0),
            options,
        }
    }

    /// Opens a persistent store, loading the existing snapshot if any
    ///
    /// A missing or corrupt snapshot yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::Storage` if the database cannot be opened
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let snapshots = SnapshotStore::open(path.as_ref())?;
        let state = StoreState::from_snapshot(snapshots.load());
        tracing::debug!(
            path = %path.as_ref().display(),
            personas = state.chats.len(),
            chats = state.owners.len(),
            "Opened chat store"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshots: Some(snapshots),
            written_seq: Mutex::new(0),
            options,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Captures the state for writing; call with the write guard held
    fn prepare(&self, state: &mut StoreState) -> Option<PendingWrite> {
        if self.snapshots.is_none() {
            state.dirty = false;
            return None;
        }
        Some(state.capture())
    }

    /// Writes a captured state; call after the write guard is dropped
    fn commit(&self, pending: Option<PendingWrite>) {
        let (Some(snapshots), Some(pending)) = (&self.snapshots, pending) else {
            return;
        };
        let mut written = self
            .written_seq
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.seq <= *written {
            tracing::trace!(seq = pending.seq, "Stale snapshot capture skipped");
            return;
        }
        match snapshots.save(&pending.snapshot()) {
            Ok(()) => *written = pending.seq,
            Err(e) => {
                tracing::warn!("Failed to write chat store snapshot: {}", e);
                self.write().dirty = true;
            }
        }
    }

    /// Writes the snapshot if there are unsaved changes
    pub fn flush(&self) {
        let pending = {
            let mut state = self.write();
            if !state.dirty {
                return;
            }
            self.prepare(&mut state)
        };
        self.commit(pending);
    }

    /// Sets the active persona
    ///
    /// If the active chat belongs to a different persona it is cleared.
    pub fn select_persona(&self, persona_id: &PersonaId) {
        let mut state = self.write();
        if let Some(active) = state.session.active_chat_id {
            if state.owners.get(&active) != Some(persona_id) {
                state.session.active_chat_id = None;
            }
        }
        state.session.active_persona_id = Some(persona_id.clone());
    }

    /// Active persona, if one is selected
    pub fn active_persona_id(&self) -> Option<PersonaId> {
        self.read().session.active_persona_id.clone()
    }

    /// Active chat id, if one is selected
    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.read().session.active_chat_id
    }

    /// Copy of the transient session state
    pub fn session(&self) -> SessionState {
        self.read().session.clone()
    }

    /// Whether the chat list is expanded
    pub fn sidebar_open(&self) -> bool {
        self.read().session.sidebar_open
    }

    /// Flips the sidebar flag and returns the new value
    pub fn toggle_sidebar(&self) -> bool {
        let mut state = self.write();
        state.session.sidebar_open = !state.session.sidebar_open;
        state.session.sidebar_open
    }

    /// Creates an empty chat for a persona and makes it active
    ///
    /// The chat is placed first in the persona's list and the persona becomes
    /// the active persona.
    pub fn create_chat(&self, persona_id: &PersonaId) -> ChatId {
        let mut state = self.write();
        let chat_id = state.next_chat_id();
        let chat = Chat::new(chat_id, persona_id.clone(), Utc::now());

        state
            .chats
            .entry(persona_id.clone())
            .or_default()
            .insert(0, Arc::new(chat));
        state.owners.insert(chat_id, persona_id.clone());
        state.session.active_persona_id = Some(persona_id.clone());
        state.session.active_chat_id = Some(chat_id);

        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        tracing::info!(chat_id = %chat_id, persona = %persona_id, "Created chat");
        chat_id
    }

    /// Chats of a persona, most-recent-first; empty if none
    pub fn list_chats(&self, persona_id: &PersonaId) -> Vec<Arc<Chat>> {
        self.read()
            .chats
            .get(persona_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every persona that has at least one chat, with its chats
    pub fn all_chats(&self) -> BTreeMap<PersonaId, Vec<Arc<Chat>>> {
        self.read()
            .chats
            .iter()
            .filter(|(_, chats)| !chats.is_empty())
            .map(|(persona, chats)| (persona.clone(), chats.clone()))
            .collect()
    }

    /// Looks up a chat by id
    pub fn chat(&self, chat_id: ChatId) -> Option<Arc<Chat>> {
        self.read().chat(chat_id).cloned()
    }

    /// The active chat, resolved through the active persona
    ///
    /// Absent if no persona or chat is selected, or the chat no longer exists.
    pub fn get_active_chat(&self) -> Option<Arc<Chat>> {
        let state = self.read();
        let persona_id = state.session.active_persona_id.as_ref()?;
        let chat_id = state.session.active_chat_id?;
        state
            .chats
            .get(persona_id)?
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
    }

    /// Makes an existing chat active, selecting its persona as well
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the chat does not exist
    pub fn set_active_chat(&self, chat_id: ChatId) -> StoreResult<()> {
        let mut state = self.write();
        let persona_id = state
            .owners
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| PersonaChatError::NotFound(format!("chat {}", chat_id)))?;
        state.session.active_persona_id = Some(persona_id);
        state.session.active_chat_id = Some(chat_id);
        Ok(())
    }

    /// Deletes a chat; unknown ids are ignored
    ///
    /// Clears the active chat if it was the deleted one and releases a reply
    /// in progress on it. The chat's usage
    /// record is kept unless the store was configured to purge it.
    pub fn delete_chat(&self, chat_id: ChatId) {
        let mut state = self.write();
        let Some(persona_id) = state.owners.remove(&chat_id) else {
            tracing::debug!(chat_id = %chat_id, "Delete of unknown chat ignored");
            return;
        };
        if let Some(list) = state.chats.get_mut(&persona_id) {
            list.retain(|c| c.id != chat_id);
        }
        if state.session.active_chat_id == Some(chat_id) {
            state.session.active_chat_id = None;
        }
        if self.options.purge_usage_on_delete {
            state.token_usage.remove(&chat_id);
        }
        state.in_flight.remove(&chat_id);

        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        tracing::info!(chat_id = %chat_id, persona = %persona_id, "Deleted chat");
    }

    /// Renames a chat
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::InvalidInput` for a blank title and
    /// `PersonaChatError::NotFound` if the chat does not exist
    pub fn rename_chat(&self, chat_id: ChatId, title: &str) -> StoreResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PersonaChatError::InvalidInput(
                "chat title cannot be empty".to_string(),
            ));
        }
        let mut state = self.write();
        state.chat_mut(chat_id)?.title = title.to_string();
        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        Ok(())
    }

    /// Appends a message to a chat and returns its id
    ///
    /// A streaming message claims the chat until it is finished.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the chat does not exist and
    /// `PersonaChatError::TurnInProgress` while a reply is in progress on
    /// the chat
    pub fn append_message(&self, chat_id: ChatId, message: NewMessage) -> StoreResult<MessageId> {
        let mut state = self.write();
        if state.chat(chat_id).is_none() {
            return Err(PersonaChatError::NotFound(format!("chat {}", chat_id)));
        }
        if state.in_flight.contains_key(&chat_id) {
            return Err(PersonaChatError::TurnInProgress(chat_id.to_string()));
        }

        let chat = state.chat_mut(chat_id)?;
        let id = chat.next_message_id();
        chat.messages.push(Message {
            id,
            sender: message.sender,
            text: message.text,
            created_at: Utc::now(),
            streaming: message.streaming,
        });
        if message.streaming {
            state.in_flight.insert(chat_id, id);
        }

        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        Ok(id)
    }

    /// Replaces the text and streaming flag of one message in place
    ///
    /// Meant to be called once per received chunk; it marks the store dirty
    /// instead of writing the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the chat or message does not
    /// exist and `PersonaChatError::TurnInProgress` when it would mark a
    /// second message of the chat as streaming
    pub fn update_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        still_streaming: bool,
    ) -> StoreResult<()> {
        let mut state = self.write();
        let chat = state.chat_mut(chat_id)?;
        if still_streaming
            && chat
                .streaming_message()
                .is_some_and(|m| m.id != message_id)
        {
            return Err(PersonaChatError::TurnInProgress(chat_id.to_string()));
        }

        let message = chat
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                PersonaChatError::NotFound(format!("message {} in chat {}", message_id, chat_id))
            })?;
        if message.text != text {
            message.text.clear();
            message.text.push_str(text);
        }
        message.streaming = still_streaming;
        state.dirty = true;
        Ok(())
    }

    /// Marks a message as no longer streaming and writes the snapshot
    ///
    /// Releases the chat's turn if this message holds it.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the chat or message does not
    /// exist
    pub fn finish_message(&self, chat_id: ChatId, message_id: MessageId) -> StoreResult<()> {
        let mut state = self.write();
        let chat = state.chat_mut(chat_id)?;
        let message = chat
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                PersonaChatError::NotFound(format!("message {} in chat {}", message_id, chat_id))
            })?;
        message.streaming = false;
        if state.in_flight.get(&chat_id) == Some(&message_id) {
            state.in_flight.remove(&chat_id);
        }

        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        Ok(())
    }

    /// True if the chat currently has a message flagged as streaming
    pub fn has_streaming_message(&self, chat_id: ChatId) -> bool {
        self.read()
            .chat(chat_id)
            .is_some_and(|c| c.streaming_message().is_some())
    }

    /// True while a reply claimed by a streaming placeholder is unfinished
    ///
    /// Unlike [`ChatStore::has_streaming_message`] this stays true after
    /// the placeholder receives its first text.
    pub fn turn_in_progress(&self, chat_id: ChatId) -> bool {
        self.read().in_flight.contains_key(&chat_id)
    }

    /// Records one response's token usage for a chat
    ///
    /// Creates the chat's usage record on first use.
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::NotFound` if the chat does not exist
    pub fn record_usage(
        &self,
        chat_id: ChatId,
        input_tokens: u64,
        output_tokens: u64,
    ) -> StoreResult<()> {
        let mut state = self.write();
        if !state.owners.contains_key(&chat_id) {
            return Err(PersonaChatError::NotFound(format!("chat {}", chat_id)));
        }
        state
            .token_usage
            .entry(chat_id)
            .or_insert_with(|| UsageRecord::new(chat_id))
            .record(input_tokens, output_tokens, Utc::now());

        let pending = self.prepare(&mut state);
        drop(state);
        self.commit(pending);
        tracing::debug!(
            chat_id = %chat_id,
            input_tokens,
            output_tokens,
            "Recorded token usage"
        );
        Ok(())
    }

    /// Usage of one chat; an empty record if nothing was recorded
    pub fn chat_usage(&self, chat_id: ChatId) -> UsageRecord {
        self.read()
            .token_usage
            .get(&chat_id)
            .cloned()
            .unwrap_or_else(|| UsageRecord::new(chat_id))
    }

    /// Every usage record, including those of deleted chats still retained
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        let state = self.read();
        let mut records: Vec<UsageRecord> = state.token_usage.values().cloned().collect();
        records.sort_by_key(|r| r.chat_id());
        records
    }

    /// Totals across all usage records
    pub fn total_usage(&self) -> UsageTotals {
        UsageTotals::from_records(self.read().token_usage.values())
    }

    /// Cumulative usage series across all records
    pub fn usage_series(&self, granularity: Granularity) -> Vec<UsagePoint> {
        bucket(self.read().token_usage.values(), granularity)
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.dirty {
            let pending = state.capture();
            if let Some(snapshots) = &self.snapshots {
                if let Err(e) = snapshots.save(&pending.snapshot()) {
                    tracing::warn!("Failed to write chat store snapshot on drop: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn persona(id: &str) -> PersonaId {
        PersonaId::new(id)
    }

    #[test]
    fn test_create_chat_prepends_and_activates() {
        let store = ChatStore::in_memory();
        let p = persona("p1");
        let first = store.create_chat(&p);
        let second = store.create_chat(&p);

        assert!(second > first);
        let ids: Vec<ChatId> = store.list_chats(&p).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(store.active_chat_id(), Some(second));
        assert_eq!(store.active_persona_id(), Some(p));
    }

    #[test]
    fn test_list_chats_unknown_persona_is_empty() {
        let store = ChatStore::in_memory();
        assert!(store.list_chats(&persona("ghost")).is_empty());
    }

    #[test]
    fn test_get_active_chat_requires_persona_and_chat() {
        let store = ChatStore::in_memory();
        assert!(store.get_active_chat().is_none());

        let p = persona("p1");
        let chat_id = store.create_chat(&p);
        assert_eq!(store.get_active_chat().unwrap().id, chat_id);

        store.select_persona(&persona("p2"));
        assert!(store.get_active_chat().is_none());
        assert_eq!(store.active_chat_id(), None);
    }

    #[test]
    fn test_select_persona_keeps_chat_of_same_persona() {
        let store = ChatStore::in_memory();
        let p = persona("p1");
        let chat_id = store.create_chat(&p);
        store.select_persona(&p);
        assert_eq!(store.active_chat_id(), Some(chat_id));
        assert_eq!(store.list_chats(&p).len(), 1);
    }

    #[test]
    fn test_delete_active_chat_clears_selection() {
        let store = ChatStore::in_memory();
        let p = persona("p1");
        let chat_id = store.create_chat(&p);
        store.delete_chat(chat_id);
        assert_eq!(store.active_chat_id(), None);
        assert!(store.get_active_chat().is_none());
        assert!(store.list_chats(&p).is_empty());
    }

    #[test]
    fn test_delete_other_chat_keeps_selection() {
        let store = ChatStore::in_memory();
        let p = persona("p1");
        let older = store.create_chat(&p);
        let active = store.create_chat(&p);
        store.delete_chat(older);
        assert_eq!(store.active_chat_id(), Some(active));
        assert_eq!(store.list_chats(&p).len(), 1);
    }

    #[test]
    fn test_delete_unknown_chat_is_noop() {
        let store = ChatStore::in_memory();
        let p = persona("p1");
        let chat_id = store.create_chat(&p);
        store.delete_chat(ChatId(1));
        store.delete_chat(chat_id);
        store.delete_chat(chat_id);
        assert!(store.list_chats(&p).is_empty());
    }

    #[test]
    fn test_delete_chat_of_inactive_persona() {
        let store = ChatStore::in_memory();
        let a = store.create_chat(&persona("a"));
        let b = store.create_chat(&persona("b"));
        store.delete_chat(a);
        assert!(store.list_chats(&persona("a")).is_empty());
        assert_eq!(store.active_chat_id(), Some(b));
    }

    #[test]
    fn test_append_to_missing_chat_is_not_found() {
        let store = ChatStore::in_memory();
        let err = store
            .append_message(ChatId(99), NewMessage::assistant("x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let a = store
            .append_message(chat_id, NewMessage::user("one").unwrap())
            .unwrap();
        let b = store
            .append_message(chat_id, NewMessage::assistant("two"))
            .unwrap();
        let c = store
            .append_message(chat_id, NewMessage::user("three").unwrap())
            .unwrap();
        assert!(a < b && b < c);

        store.update_message_text(chat_id, b, "TWO", false).unwrap();
        let texts: Vec<String> = store
            .chat(chat_id)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.text.clone())
            .collect();
        assert_eq!(texts, vec!["one", "TWO", "three"]);
    }

    #[test]
    fn test_second_streaming_message_rejected() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        let err = store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap_err();
        assert!(matches!(err, PersonaChatError::TurnInProgress(_)));
        assert_eq!(store.chat(chat_id).unwrap().streaming_count(), 1);
    }

    #[test]
    fn test_turn_stays_claimed_after_reply_text_arrives() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let reply = store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        store.update_message_text(chat_id, reply, "Hel", false).unwrap();
        assert!(!store.has_streaming_message(chat_id));
        assert!(store.turn_in_progress(chat_id));

        let err = store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap_err();
        assert!(matches!(err, PersonaChatError::TurnInProgress(_)));
        let err = store
            .append_message(chat_id, NewMessage::user("again").unwrap())
            .unwrap_err();
        assert!(matches!(err, PersonaChatError::TurnInProgress(_)));
        assert_eq!(store.chat(chat_id).unwrap().messages.len(), 1);

        store.finish_message(chat_id, reply).unwrap();
        assert!(!store.turn_in_progress(chat_id));
        store
            .append_message(chat_id, NewMessage::user("again").unwrap())
            .unwrap();
    }

    #[test]
    fn test_finishing_other_message_keeps_turn() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let done = store
            .append_message(chat_id, NewMessage::assistant("done"))
            .unwrap();
        store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        store.finish_message(chat_id, done).unwrap();
        assert!(store.turn_in_progress(chat_id));
    }

    #[test]
    fn test_delete_releases_turn() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        store.delete_chat(chat_id);
        assert!(!store.turn_in_progress(chat_id));
    }

    #[test]
    fn test_update_cannot_mark_second_message_streaming() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let done = store
            .append_message(chat_id, NewMessage::assistant("done"))
            .unwrap();
        store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        assert!(store.update_message_text(chat_id, done, "x", true).is_err());
        assert!(store.update_message_text(chat_id, done, "x", false).is_ok());
        assert_eq!(store.chat(chat_id).unwrap().streaming_count(), 1);
    }

    #[test]
    fn test_update_missing_message_is_not_found() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let err = store
            .update_message_text(chat_id, MessageId(5), "x", false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_reader_snapshot_is_unaffected_by_later_writes() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let msg = store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        let before = store.chat(chat_id).unwrap();
        store.update_message_text(chat_id, msg, "hello", false).unwrap();

        assert_eq!(before.messages[0].text, "");
        assert_eq!(store.chat(chat_id).unwrap().messages[0].text, "hello");
    }

    #[test]
    fn test_finish_message_clears_streaming() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        let msg = store
            .append_message(chat_id, NewMessage::assistant_placeholder())
            .unwrap();
        assert!(store.has_streaming_message(chat_id));
        store.finish_message(chat_id, msg).unwrap();
        assert!(!store.has_streaming_message(chat_id));
    }

    #[test]
    fn test_rename_chat() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        store.rename_chat(chat_id, "  Physics  ").unwrap();
        assert_eq!(store.chat(chat_id).unwrap().title, "Physics");
        assert!(store.rename_chat(chat_id, "   ").is_err());
        assert!(store.rename_chat(ChatId(1), "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_active_chat_selects_owner_persona() {
        let store = ChatStore::in_memory();
        let a = store.create_chat(&persona("a"));
        store.create_chat(&persona("b"));
        store.set_active_chat(a).unwrap();
        assert_eq!(store.active_persona_id(), Some(persona("a")));
        assert_eq!(store.get_active_chat().unwrap().id, a);
        assert!(store.set_active_chat(ChatId(3)).is_err());
    }

    #[test]
    fn test_toggle_sidebar() {
        let store = ChatStore::in_memory();
        assert!(store.sidebar_open());
        assert!(!store.toggle_sidebar());
        assert!(!store.sidebar_open());
        assert!(store.toggle_sidebar());
    }

    #[test]
    fn test_record_usage_and_totals() {
        let store = ChatStore::in_memory();
        let a = store.create_chat(&persona("p"));
        let b = store.create_chat(&persona("p"));
        store.record_usage(a, 3, 2).unwrap();
        store.record_usage(a, 1, 1).unwrap();
        store.record_usage(b, 10, 20).unwrap();

        let usage = store.chat_usage(a);
        assert_eq!(usage.total_input_tokens(), 4);
        assert_eq!(usage.total_output_tokens(), 3);
        assert_eq!(usage.history().len(), 2);
        assert_eq!(
            store.total_usage(),
            UsageTotals {
                input: 14,
                output: 23
            }
        );
        assert!(store.record_usage(ChatId(1), 1, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_chat_usage_defaults_to_empty_record() {
        let store = ChatStore::in_memory();
        let usage = store.chat_usage(ChatId(77));
        assert!(usage.is_empty());
        assert_eq!(usage.total_input_tokens(), 0);
    }

    #[test]
    fn test_usage_retained_after_delete_by_default() {
        let store = ChatStore::in_memory();
        let chat_id = store.create_chat(&persona("p"));
        store.record_usage(chat_id, 5, 5).unwrap();
        store.delete_chat(chat_id);
        assert_eq!(store.chat_usage(chat_id).total_input_tokens(), 5);
        assert_eq!(store.total_usage().input, 5);
    }

    #[test]
    fn test_usage_purged_after_delete_when_configured() {
        let store = ChatStore::with_options(StoreOptions {
            purge_usage_on_delete: true,
        });
        let chat_id = store.create_chat(&persona("p"));
        store.record_usage(chat_id, 5, 5).unwrap();
        store.delete_chat(chat_id);
        assert!(store.chat_usage(chat_id).is_empty());
        assert!(store.usage_records().is_empty());
    }

    #[test]
    fn test_persistent_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let p = persona("einstein");

        let (chat_id, msg_id) = {
            let store = ChatStore::open(&path, StoreOptions::default()).unwrap();
            let chat_id = store.create_chat(&p);
            store
                .append_message(chat_id, NewMessage::user("hi").unwrap())
                .unwrap();
            let msg_id = store
                .append_message(chat_id, NewMessage::assistant_placeholder())
                .unwrap();
            store.update_message_text(chat_id, msg_id, "Hello", true).unwrap();
            store.record_usage(chat_id, 3, 2).unwrap();
            (chat_id, msg_id)
        };

        let store = ChatStore::open(&path, StoreOptions::default()).unwrap();
        let chat = store.chat(chat_id).expect("chat persisted");
        assert_eq!(chat.messages.len(), 2);
        let reply = chat.message(msg_id).unwrap();
        assert_eq!(reply.text, "Hello");
        assert!(!reply.streaming);
        assert_eq!(store.chat_usage(chat_id).total_output_tokens(), 2);
        assert_eq!(store.active_chat_id(), None);

        let next = store.create_chat(&p);
        assert!(next > chat_id);
    }

    #[test]
    fn test_stale_capture_is_not_written_over_newer_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let p = persona("p");

        let (first, second) = {
            let store = ChatStore::open(&path, StoreOptions::default()).unwrap();
            let first = store.create_chat(&p);
            let older = store.prepare(&mut store.write());
            let second = store.create_chat(&p);
            store.commit(older);
            (first, second)
        };

        let store = ChatStore::open(&path, StoreOptions::default()).unwrap();
        assert!(store.chat(first).is_some());
        assert!(store.chat(second).is_some());
    }
}
