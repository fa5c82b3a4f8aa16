//! Prompt construction for generation requests

use crate::persona::Persona;
use crate::store::{Message, Sender};
use crate::transport::GenerationRequest;

/// Label used for user lines in the transcript
pub const USER_LABEL: &str = "User";

/// Renders the transcript, one `"<label>: <text>"` line per message
///
/// Streaming messages are skipped.
pub fn render_transcript(persona: &Persona, messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.streaming)
        .map(|m| {
            let label = match m.sender {
                Sender::User => USER_LABEL,
                Sender::Assistant => persona.name.as_str(),
            };
            format!("{}: {}", label, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the full prompt sent to the generation endpoint
///
/// The prompt is the persona preamble, a blank line, the transcript and a
/// final `"<persona name>:"` cue for the reply.
///
/// # Examples
///
/// ```
/// use personachat::persona::Persona;
/// use personachat::prompt::build_prompt;
///
/// let persona = Persona::new("p", "Pirate", "Talk like a pirate.");
/// assert_eq!(build_prompt(&persona, &[]), "Talk like a pirate.\n\n\nPirate:");
/// ```
pub fn build_prompt(persona: &Persona, messages: &[Message]) -> String {
    format!(
        "{}\n\n{}\n{}:",
        persona.prompt_preamble,
        render_transcript(persona, messages),
        persona.name
    )
}

/// Builds the request for the next assistant reply
pub fn build_request(persona: &Persona, messages: &[Message]) -> GenerationRequest {
    GenerationRequest::new(build_prompt(persona, messages), persona.name.clone())
}
