//! Persona descriptors and the catalog they are looked up from
//!
//! Personas are defined outside the core: either the built-in catalog or a
//! `personas:` list in the configuration file. The store and the ingestor
//! only ever read them.

use crate::error::PersonaChatError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identifier of a persona
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    /// Creates a persona id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Immutable persona descriptor
///
/// # Examples
///
/// ```
/// use personachat::persona::Persona;
///
/// let persona = Persona::new("captain", "Captain Saltbeard", "You are a pirate.");
/// assert_eq!(persona.id.as_str(), "captain");
/// assert_eq!(persona.name, "Captain Saltbeard");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique, stable identifier
    pub id: PersonaId,
    /// Display name, also used as the assistant's label in prompts
    pub name: String,
    /// Persona system text placed at the top of every prompt
    pub prompt_preamble: String,
    /// One-line description shown in persona listings
    #[serde(default)]
    pub description: String,
    /// Free-form presentation tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Persona {
    /// Creates a persona with an empty description and no tags
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt_preamble: impl Into<String>,
    ) -> Self {
        Self {
            id: PersonaId::new(id),
            name: name.into(),
            prompt_preamble: prompt_preamble.into(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    /// Sets the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Read-only set of personas available to the application
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    /// Builds a catalog from explicit personas
    ///
    /// # Errors
    ///
    /// Returns `PersonaChatError::Config` if the list is empty, an id or
    /// name is blank, or two personas share an id.
    pub fn from_personas(personas: Vec<Persona>) -> Result<Self, PersonaChatError> {
        if personas.is_empty() {
            return Err(PersonaChatError::Config(
                "persona catalog cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for persona in &personas {
            if persona.id.as_str().trim().is_empty() {
                return Err(PersonaChatError::Config(
                    "persona id cannot be empty".to_string(),
                ));
            }
            if persona.name.trim().is_empty() {
                return Err(PersonaChatError::Config(format!(
                    "persona {} has an empty name",
                    persona.id
                )));
            }
            if !seen.insert(persona.id.clone()) {
                return Err(PersonaChatError::Config(format!(
                    "duplicate persona id: {}",
                    persona.id
                )));
            }
        }

        Ok(Self { personas })
    }

    /// The catalog shipped with the binary
    pub fn builtin() -> Self {
        Self {
            personas: vec![
                Persona::new(
                    "einstein",
                    "Albert Einstein",
                    "You are Albert Einstein, the theoretical physicist. You explain complex \
                     ideas in simple terms, love thought experiments and often begin them with \
                     \"Imagine, if you will...\". You are humble, curious and a little playful.",
                )
                .with_description("Talk relativity and thought experiments with a famous physicist"),
                Persona::new(
                    "lovelace",
                    "Ada Lovelace",
                    "You are Ada Lovelace, mathematician and the first computer programmer. You \
                     speak with Victorian courtesy, delight in the Analytical Engine and connect \
                     poetry with science whenever you can.",
                )
                .with_description("Discuss engines, numbers and poetical science"),
                Persona::new(
                    "saltbeard",
                    "Captain Saltbeard",
                    "You are Captain Saltbeard, a cheerful old sea captain. You talk like a sailor, \
                     tell tall tales about storms and sea monsters and give surprisingly sound \
                     advice wrapped in nautical metaphors.",
                )
                .with_description("Swap sea stories with a weathered captain"),
            ],
        }
    }

    /// Looks up a persona by id
    pub fn get(&self, id: &PersonaId) -> Option<&Persona> {
        self.personas.iter().find(|p| &p.id == id)
    }

    /// Returns true if the catalog contains the id
    pub fn contains(&self, id: &PersonaId) -> bool {
        self.get(id).is_some()
    }

    /// Iterates personas in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    /// Number of personas
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Returns true if the catalog has no personas
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
