//! Configuration management for PersonaChat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{PersonaChatError, Result};
use crate::persona::{Persona, PersonaCatalog, PersonaId};
use crate::store::StoreOptions;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for PersonaChat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation endpoint settings
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Chat store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chat behavior
    #[serde(default)]
    pub chat: ChatConfig,
    /// Persona catalog; empty means the built-in personas
    #[serde(default)]
    pub personas: Vec<Persona>,
}

/// Generation endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL generation requests are POSTed to
    #[serde(default = "default_endpoint_url")]
    pub url: String,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Timeout for a whole request including the streamed body
    ///
    /// Unset by default so long replies are never cut off.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

fn default_endpoint_url() -> String {
    "https://personachat-api-931690948663.us-central1.run.app/api/gemini-stream".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            request_timeout_seconds: None,
        }
    }
}

/// Chat store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store directory; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Drop a chat's token usage when the chat is deleted
    #[serde(default)]
    pub purge_usage_on_delete: bool,
}

/// Chat behavior configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Persona selected when none is given on the command line
    #[serde(default)]
    pub default_persona: Option<String>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PersonaChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| PersonaChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("PERSONACHAT_ENDPOINT") {
            self.endpoint.url = url;
        }

        if let Ok(timeout) = std::env::var("PERSONACHAT_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.endpoint.connect_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PERSONACHAT_CONNECT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("PERSONACHAT_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.endpoint.request_timeout_seconds = Some(value);
            } else {
                tracing::warn!("Invalid PERSONACHAT_REQUEST_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(path) = std::env::var("PERSONACHAT_STORE") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(purge) = std::env::var("PERSONACHAT_PURGE_USAGE") {
            match purge.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.storage.purge_usage_on_delete = true,
                "0" | "false" | "no" => self.storage.purge_usage_on_delete = false,
                _ => tracing::warn!("Invalid PERSONACHAT_PURGE_USAGE: {}", purge),
            }
        }

        if let Ok(persona) = std::env::var("PERSONACHAT_DEFAULT_PERSONA") {
            self.chat.default_persona = Some(persona);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
        if let Some(url) = &cli.endpoint {
            self.endpoint.url = url.clone();
        }
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not an http(s) URL, a timeout is
    /// zero, the persona list is invalid, or the default persona is unknown
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;

        if self.endpoint.connect_timeout_seconds == 0 {
            return Err(PersonaChatError::Config(
                "endpoint.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.endpoint.request_timeout_seconds == Some(0) {
            return Err(PersonaChatError::Config(
                "endpoint.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        let catalog = self.catalog()?;
        if let Some(default) = &self.chat.default_persona {
            if !catalog.contains(&PersonaId::new(default.as_str())) {
                return Err(PersonaChatError::Config(format!(
                    "chat.default_persona {} is not a known persona",
                    default
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Parsed endpoint URL
    ///
    /// # Errors
    ///
    /// Returns a config error unless the URL parses with an http(s) scheme
    pub fn endpoint_url(&self) -> Result<url::Url> {
        let url = url::Url::parse(&self.endpoint.url).map_err(|e| {
            PersonaChatError::Config(format!("Invalid endpoint.url {}: {}", self.endpoint.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PersonaChatError::Config(format!(
                "endpoint.url must use http or https, got {}",
                url.scheme()
            ))
            .into());
        }
        Ok(url)
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint.connect_timeout_seconds)
    }

    /// Whole-request timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.endpoint.request_timeout_seconds.map(Duration::from_secs)
    }

    /// Persona catalog from config, or the built-in one
    ///
    /// # Errors
    ///
    /// Returns a config error for duplicate or blank persona ids or names
    pub fn catalog(&self) -> Result<PersonaCatalog> {
        if self.personas.is_empty() {
            return Ok(PersonaCatalog::builtin());
        }
        Ok(PersonaCatalog::from_personas(self.personas.clone())?)
    }

    /// Store directory, resolving the platform default when unset
    ///
    /// # Errors
    ///
    /// Returns a storage error if no data directory can be determined
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        let proj_dirs = ProjectDirs::from("com", "personachat", "personachat").ok_or_else(|| {
            PersonaChatError::Storage("Could not determine data directory".to_string())
        })?;
        Ok(proj_dirs.data_dir().join("store"))
    }

    /// Store behavior derived from config
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            purge_usage_on_delete: self.storage.purge_usage_on_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::test_utils::{create_test_file, temp_dir, test_config_yaml};
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.endpoint.url.ends_with("/api/gemini-stream"));
        assert_eq!(config.endpoint.connect_timeout_seconds, 30);
        assert_eq!(config.endpoint.request_timeout_seconds, None);
        assert!(!config.storage.purge_usage_on_delete);
        assert!(config.personas.is_empty());
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_scheme() {
        let mut config = Config::default();
        config.endpoint.url = "ftp://example.com/stream".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unparsable_url() {
        let mut config = Config::default();
        config.endpoint.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeouts() {
        let mut config = Config::default();
        config.endpoint.connect_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.endpoint.request_timeout_seconds = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unknown_default_persona() {
        let mut config = Config::default();
        config.chat.default_persona = Some("nobody".to_string());
        assert!(config.validate().is_err());

        config.chat.default_persona = Some("einstein".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_duplicate_personas() {
        let mut config = Config::default();
        config.personas = vec![
            Persona::new("a", "A", "p"),
            Persona::new("a", "B", "p"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
endpoint:
  url: http://localhost:8080/api/stream
  request_timeout_seconds: 120
storage:
  purge_usage_on_delete: true
chat:
  default_persona: pilot
personas:
  - id: pilot
    name: Amelia
    prompt_preamble: You are an aviator.
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.endpoint.url, "http://localhost:8080/api/stream");
        assert_eq!(config.endpoint.connect_timeout_seconds, 30);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(120)));
        assert!(config.store_options().purge_usage_on_delete);
        assert!(config.validate().is_ok());
        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(&PersonaId::new("pilot")).unwrap().name, "Amelia");
    }

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.endpoint.connect_timeout_seconds, 30);
        assert_eq!(config.catalog().unwrap().len(), 3);
    }

    #[test]
    fn test_store_path_override() {
        let mut config = Config::default();
        config.storage.path = Some(PathBuf::from("/tmp/personachat-test"));
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/tmp/personachat-test")
        );
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli {
            endpoint: Some("http://127.0.0.1:9000/x".to_string()),
            storage_path: Some(PathBuf::from("/tmp/store")),
            ..Cli::default()
        };
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.endpoint.url, "http://127.0.0.1:9000/x");
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/store")));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "config.yaml", &test_config_yaml());
        let config = Config::load(path.to_str().unwrap(), &Cli::default()).unwrap();
        assert_eq!(config.endpoint.url, "http://localhost:8080/api/gemini-stream");
        assert_eq!(config.chat.default_persona, Some("navigator".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_fails() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "config.yaml", "endpoint: [unclosed");
        let err = Config::load(path.to_str().unwrap(), &Cli::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/personachat.yaml", &Cli::default()).unwrap();
        assert_eq!(config.endpoint.connect_timeout_seconds, 30);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("PERSONACHAT_ENDPOINT", "http://localhost:1234/gen");
        std::env::set_var("PERSONACHAT_CONNECT_TIMEOUT_SECONDS", "5");
        std::env::set_var("PERSONACHAT_REQUEST_TIMEOUT_SECONDS", "60");
        std::env::set_var("PERSONACHAT_PURGE_USAGE", "true");
        std::env::set_var("PERSONACHAT_DEFAULT_PERSONA", "lovelace");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("PERSONACHAT_ENDPOINT");
        std::env::remove_var("PERSONACHAT_CONNECT_TIMEOUT_SECONDS");
        std::env::remove_var("PERSONACHAT_REQUEST_TIMEOUT_SECONDS");
        std::env::remove_var("PERSONACHAT_PURGE_USAGE");
        std::env::remove_var("PERSONACHAT_DEFAULT_PERSONA");

        assert_eq!(config.endpoint.url, "http://localhost:1234/gen");
        assert_eq!(config.endpoint.connect_timeout_seconds, 5);
        assert_eq!(config.endpoint.request_timeout_seconds, Some(60));
        assert!(config.storage.purge_usage_on_delete);
        assert_eq!(config.chat.default_persona, Some("lovelace".to_string()));
    }

    #[test]
    #[serial]
    fn test_invalid_env_timeout_ignored() {
        std::env::set_var("PERSONACHAT_CONNECT_TIMEOUT_SECONDS", "soon");
        let mut config = Config::default();
        config.apply_env_vars();
        std::env::remove_var("PERSONACHAT_CONNECT_TIMEOUT_SECONDS");
        assert_eq!(config.endpoint.connect_timeout_seconds, 30);
    }
}
