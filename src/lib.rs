//! PersonaChat - persona-driven chat client library
//!
//! This library provides the core of the PersonaChat client: a persisted
//! chat store, the streaming response ingestor, token usage aggregation and
//! the chat session controller.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: Keyed chat store with snapshot persistence
//! - `ingest`: Streaming response ingestion and usage sentinel handling
//! - `usage`: Token usage records and time-bucketed aggregation
//! - `session`: Turn controller tying the store, prompts and ingestion together
//! - `transport`: Generation endpoint abstraction (HTTP and in-process fake)
//! - `persona`, `prompt`: Persona catalog and prompt construction
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use personachat::{ChatSession, ChatStore, Config, PersonaCatalog, StreamIngestor};
//! use personachat::transport::http::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let store = Arc::new(ChatStore::open(config.store_path()?, config.store_options())?);
//!     let transport = HttpTransport::new(
//!         config.endpoint_url()?,
//!         config.connect_timeout(),
//!         config.request_timeout(),
//!     )?;
//!     let ingestor = StreamIngestor::new(store.clone(), Arc::new(transport));
//!     let mut session = ChatSession::new(Arc::new(PersonaCatalog::builtin()), ingestor);
//!
//!     session.select_persona(&"einstein".into())?;
//!     session.new_chat()?;
//!     session.set_input("What is time?");
//!     let outcome = session.submit().await;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod ingest;
pub mod persona;
pub mod prompt;
pub mod session;
pub mod store;
pub mod transport;
pub mod usage;

// Re-export commonly used types
pub use config::Config;
pub use error::{PersonaChatError, Result};
pub use ingest::{IngestEvent, IngestOutcome, IngestReport, StreamIngestor};
pub use persona::{Persona, PersonaCatalog, PersonaId};
pub use session::{ChatSession, DropReason, SessionPhase, TurnOutcome};
pub use store::{ChatId, ChatStore, MessageId, NewMessage};

#[cfg(test)]
pub mod test_utils;
