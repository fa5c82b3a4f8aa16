//! Special commands parser for interactive chat mode
//!
//! Special commands manage the session instead of being sent to the
//! persona: creating, switching, renaming and deleting chats, switching
//! personas, showing token usage and leaving the session.
//!
//! Commands are prefixed with `/`; command names are case-insensitive,
//! arguments keep their case.

use crate::persona::PersonaId;
use crate::store::ChatId;
use crate::usage::Granularity;
use colored::Colorize;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new chat with the current persona
    NewChat,

    /// List the current persona's chats
    ListChats,

    /// Make another chat active
    SwitchChat(ChatId),

    /// Delete a chat; the active one when no id is given
    DeleteChat(Option<ChatId>),

    /// Rename the active chat
    RenameChat(String),

    /// Switch to another persona
    SwitchPersona(PersonaId),

    /// List available personas
    ListPersonas,

    /// Show token usage, optionally as a series
    ShowUsage(Option<Granularity>),

    /// Toggle the chat list shown after chat changes
    ToggleSidebar,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input is sent to the persona.
    None,
}

fn missing(command: &str, usage: &str) -> CommandError {
    CommandError::MissingArgument {
        command: command.to_string(),
        usage: usage.to_string(),
    }
}

fn parse_chat_id(command: &str, arg: &str) -> Result<ChatId, CommandError> {
    arg.parse::<ChatId>()
        .map_err(|_| CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: arg.to_string(),
        })
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for an unrecognized `/` command,
/// `CommandError::MissingArgument` when a required argument is absent and
/// `CommandError::UnsupportedArgument` when an argument cannot be used.
///
/// # Examples
///
/// ```
/// use personachat::commands::special_commands::{parse_special_command, SpecialCommand};
/// use personachat::store::ChatId;
///
/// assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::NewChat);
/// assert_eq!(
///     parse_special_command("/switch 42").unwrap(),
///     SpecialCommand::SwitchChat(ChatId(42))
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, arg)) => (name.to_lowercase(), arg.trim()),
        None => (trimmed.to_lowercase(), ""),
    };

    match name.as_str() {
        "exit" | "quit" | "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/new" => Ok(SpecialCommand::NewChat),
        "/chats" => Ok(SpecialCommand::ListChats),
        "/personas" => Ok(SpecialCommand::ListPersonas),
        "/sidebar" => Ok(SpecialCommand::ToggleSidebar),

        "/switch" if arg.is_empty() => Err(missing("/switch", "/switch <chat id>")),
        "/switch" => Ok(SpecialCommand::SwitchChat(parse_chat_id("/switch", arg)?)),

        "/delete" if arg.is_empty() => Ok(SpecialCommand::DeleteChat(None)),
        "/delete" => Ok(SpecialCommand::DeleteChat(Some(parse_chat_id(
            "/delete", arg,
        )?))),

        "/rename" if arg.is_empty() => Err(missing("/rename", "/rename <title>")),
        "/rename" => Ok(SpecialCommand::RenameChat(arg.to_string())),

        "/persona" if arg.is_empty() => Err(missing("/persona", "/persona <persona id>")),
        "/persona" => Ok(SpecialCommand::SwitchPersona(PersonaId::new(arg))),

        "/usage" if arg.is_empty() => Ok(SpecialCommand::ShowUsage(None)),
        "/usage" => arg
            .parse::<Granularity>()
            .map(|g| SpecialCommand::ShowUsage(Some(g)))
            .map_err(|_| CommandError::UnsupportedArgument {
                command: "/usage".to_string(),
                arg: arg.to_string(),
            }),

        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help for the special commands
pub fn print_help() {
    println!("\n{}", "Chat commands:".bold());
    let rows = [
        ("/new", "Start a new chat with the current persona"),
        ("/chats", "List this persona's chats"),
        ("/switch <id>", "Continue another chat"),
        ("/rename <title>", "Rename the current chat"),
        ("/delete [id]", "Delete a chat (current chat by default)"),
        ("/persona <id>", "Talk to another persona"),
        ("/personas", "List available personas"),
        ("/usage [hour|day|week|month]", "Show token usage"),
        ("/sidebar", "Toggle the chat list after chat changes"),
        ("/help", "Show this help"),
        ("/exit", "Leave the session (also: exit, quit, Ctrl-D)"),
    ];
    for (command, description) in rows {
        println!("  {:<32} {}", command.cyan(), description);
    }
    println!();
}
