//! Test utilities for PersonaChat
//!
//! This module provides common test utilities including temporary directory
//! management, config fixtures, seeded stores and assertion helpers.

use crate::config::Config;
use crate::error::PersonaChatError;
use crate::persona::PersonaId;
use crate::store::{ChatId, ChatStore, NewMessage};
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T, PersonaChatError>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration pointing at a local endpoint
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.endpoint.url = "http://127.0.0.1:9/api/stream".to_string();
    config.endpoint.connect_timeout_seconds = 1;
    config
}

/// Create a test configuration YAML string
pub fn test_config_yaml() -> String {
    r#"
endpoint:
  url: http://localhost:8080/api/gemini-stream
  connect_timeout_seconds: 5
  request_timeout_seconds: 60
storage:
  purge_usage_on_delete: false
chat:
  default_persona: navigator
personas:
  - id: navigator
    name: The Navigator
    prompt_preamble: You chart courses across unknown seas.
    description: Plots routes and tells of far shores
  - id: einstein
    name: Albert Einstein
    prompt_preamble: You are Albert Einstein.
"#
    .to_string()
}

/// In-memory store with one chat holding a finished exchange
pub fn seeded_store(persona: &str) -> (ChatStore, ChatId) {
    let store = ChatStore::in_memory();
    let chat_id = store.create_chat(&PersonaId::new(persona));
    store
        .append_message(chat_id, NewMessage::user("Hello there").expect("valid message"))
        .expect("append user message");
    store
        .append_message(chat_id, NewMessage::assistant("Greetings!"))
        .expect("append reply");
    (store, chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.txt", "content");
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "content");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<(), PersonaChatError> =
            Err(PersonaChatError::Config("test error message".to_string()));
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: Result<(), PersonaChatError> = Ok(());
        assert_error_contains(result, "error");
    }

    #[test]
    #[should_panic(expected = "does not contain")]
    fn test_assert_error_contains_wrong_message() {
        let result: Result<(), PersonaChatError> =
            Err(PersonaChatError::Config("different error".to_string()));
        assert_error_contains(result, "not present");
    }

    #[test]
    fn test_test_config() {
        let config = test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_config_yaml() {
        let yaml = test_config_yaml();
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.catalog().unwrap().len(), 2);
    }

    #[test]
    fn test_seeded_store() {
        let (store, chat_id) = seeded_store("einstein");
        let chat = store.chat(chat_id).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(store.active_chat_id(), Some(chat_id));
    }
}
