//! Chat management commands

use crate::cli::ChatCommand;
use crate::error::{PersonaChatError, Result};
use crate::persona::{PersonaCatalog, PersonaId};
use crate::store::{Chat, ChatId, ChatStore, Sender};
use colored::Colorize;
use prettytable::{format, Table};
use std::sync::Arc;

const TITLE_WIDTH: usize = 40;

fn shorten(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Parses a chat id argument and checks the chat exists
///
/// # Errors
///
/// Returns an invalid-input error for a non-numeric id and a not-found
/// error for an unknown chat
pub fn resolve_chat(store: &ChatStore, id: &str) -> Result<Arc<Chat>> {
    let chat_id: ChatId = id.parse()?;
    store
        .chat(chat_id)
        .ok_or_else(|| PersonaChatError::NotFound(format!("chat {}", chat_id)).into())
}

/// Builds a table of chats, marking the active one
pub fn chat_table(chats: &[Arc<Chat>], active: Option<ChatId>, show_persona: bool) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    if show_persona {
        table.add_row(prettytable::row![
            "",
            "ID".bold(),
            "Persona".bold(),
            "Title".bold(),
            "Messages".bold(),
            "Created".bold()
        ]);
    } else {
        table.add_row(prettytable::row![
            "",
            "ID".bold(),
            "Title".bold(),
            "Messages".bold(),
            "Created".bold()
        ]);
    }

    for chat in chats {
        let marker = if Some(chat.id) == active { "*" } else { "" };
        let title = shorten(&chat.title, TITLE_WIDTH);
        let created = chat
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        if show_persona {
            table.add_row(prettytable::row![
                marker,
                chat.id.to_string().cyan(),
                chat.persona_id,
                title,
                chat.messages.len(),
                created
            ]);
        } else {
            table.add_row(prettytable::row![
                marker,
                chat.id.to_string().cyan(),
                title,
                chat.messages.len(),
                created
            ]);
        }
    }
    table
}

/// Prints a chat transcript
pub fn print_transcript(chat: &Chat, persona_name: &str) {
    for message in &chat.messages {
        match message.sender {
            Sender::User => println!("{} {}", "You:".cyan().bold(), message.text),
            Sender::Assistant => {
                let text = if message.streaming && message.text.is_empty() {
                    "...".dimmed().to_string()
                } else {
                    message.text.clone()
                };
                println!("{} {}", format!("{}:", persona_name).green().bold(), text)
            }
        }
        println!();
    }
}

fn persona_name(catalog: &PersonaCatalog, id: &PersonaId) -> String {
    catalog
        .get(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Handle chat management commands
pub fn handle_chats(command: ChatCommand, store: &ChatStore, catalog: &PersonaCatalog) -> Result<()> {
    match command {
        ChatCommand::List { persona } => {
            let chats: Vec<Arc<Chat>> = match &persona {
                Some(id) => store.list_chats(&PersonaId::new(id.as_str())),
                None => store.all_chats().into_values().flatten().collect(),
            };

            if chats.is_empty() {
                println!("{}", "No chats found.".yellow());
                return Ok(());
            }

            println!("\nChats:");
            chat_table(&chats, store.active_chat_id(), persona.is_none()).printstd();
            println!();
            println!(
                "Use {} to continue a chat.",
                "personachat chat --chat <ID>".cyan()
            );
            println!();
        }
        ChatCommand::Show { id } => {
            let chat = resolve_chat(store, &id)?;
            println!(
                "\n{} {}\n",
                chat.title.bold(),
                format!("({}, {})", chat.id, persona_name(catalog, &chat.persona_id)).dimmed()
            );
            if chat.messages.is_empty() {
                println!("{}", "No messages yet.".yellow());
            }
            print_transcript(&chat, &persona_name(catalog, &chat.persona_id));
        }
        ChatCommand::Delete { id } => {
            let chat = resolve_chat(store, &id)?;
            store.delete_chat(chat.id);
            println!("{}", format!("Deleted chat {}", chat.id).green());
        }
        ChatCommand::Rename { id, title } => {
            let chat = resolve_chat(store, &id)?;
            store.rename_chat(chat.id, &title)?;
            println!("{}", format!("Renamed chat {} to {}", chat.id, title.trim()).green());
        }
    }

    Ok(())
}
