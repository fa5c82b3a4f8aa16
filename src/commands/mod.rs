/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`: Interactive chat with a persona
- `personas`: List the persona catalog
- `chats`: List, show, rename and delete stored chats
- `usage`: Token usage totals and cumulative series

Handlers share an [`AppContext`] holding the configuration, the persona
catalog and the chat store.
*/

use crate::config::Config;
use crate::error::Result;
use crate::ingest::StreamIngestor;
use crate::persona::PersonaCatalog;
use crate::store::ChatStore;
use crate::transport::http::HttpTransport;
use std::sync::Arc;

pub mod chats;
pub mod personas;
pub mod special_commands;
pub mod usage;

/// Shared state for command handlers
pub struct AppContext {
    /// Validated configuration
    pub config: Config,
    /// Available personas
    pub catalog: Arc<PersonaCatalog>,
    /// Chat store, persistent unless running ephemeral
    pub store: Arc<ChatStore>,
}

impl AppContext {
    /// Builds the context from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if the persona catalog is invalid or the store cannot
    /// be opened
    pub fn build(config: Config, ephemeral: bool) -> Result<Self> {
        let catalog = Arc::new(config.catalog()?);
        let store = if ephemeral {
            tracing::info!("Using in-memory store");
            ChatStore::with_options(config.store_options())
        } else {
            let path = config.store_path()?;
            tracing::debug!("Opening chat store at {}", path.display());
            ChatStore::open(&path, config.store_options())?
        };

        Ok(Self {
            config,
            catalog,
            store: Arc::new(store),
        })
    }

    /// Creates an ingestor talking to the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL is invalid or the HTTP client
    /// cannot be built
    pub fn ingestor(&self) -> Result<StreamIngestor> {
        let transport = HttpTransport::new(
            self.config.endpoint_url()?,
            self.config.connect_timeout(),
            self.config.request_timeout(),
        )?;
        Ok(StreamIngestor::new(self.store.clone(), Arc::new(transport)))
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Resolves the persona and chat to start with, then runs a
    //! readline-based loop that sends each line as a user turn and prints
    //! the reply as it streams in.

    use super::*;
    use crate::commands::chats::{chat_table, print_transcript};
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::error::PersonaChatError;
    use crate::ingest::{IngestEvent, IngestOutcome, IngestReport};
    use crate::persona::{Persona, PersonaId};
    use crate::session::{ChatSession, TurnOutcome};
    use crate::store::ChatId;
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::io::Write;
    use tokio::sync::mpsc;

    /// Picks the persona to start with
    ///
    /// Order: explicit argument, configured default, then the first catalog
    /// entry. The store's selection is not persisted, so it never applies.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the requested persona is unknown
    pub fn resolve_persona(ctx: &AppContext, requested: Option<&str>) -> Result<Persona> {
        let candidate = requested
            .map(PersonaId::new)
            .or_else(|| ctx.config.chat.default_persona.as_deref().map(PersonaId::new));

        match candidate {
            Some(id) => ctx
                .catalog
                .get(&id)
                .cloned()
                .ok_or_else(|| PersonaChatError::NotFound(format!("persona {}", id)).into()),
            None => ctx.catalog.iter().next().cloned().ok_or_else(|| {
                PersonaChatError::Config("persona catalog is empty".to_string()).into()
            }),
        }
    }

    /// Picks the chat to start with and makes it active
    ///
    /// Order: explicit chat id, a new chat if requested, the persona's most
    /// recent chat, then a new chat.
    ///
    /// # Errors
    ///
    /// Returns error if the requested chat id is invalid or unknown
    pub fn resolve_chat(
        ctx: &AppContext,
        persona: &Persona,
        chat: Option<&str>,
        new: bool,
    ) -> Result<ChatId> {
        ctx.store.select_persona(&persona.id);

        if let Some(id) = chat {
            let chat_id: ChatId = id.parse()?;
            ctx.store.set_active_chat(chat_id)?;
            return Ok(chat_id);
        }
        if !new {
            if let Some(latest) = ctx.store.list_chats(&persona.id).first() {
                ctx.store.set_active_chat(latest.id)?;
                return Ok(latest.id);
            }
        }
        Ok(ctx.store.create_chat(&persona.id))
    }

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `ctx` - Application context
    /// * `persona` - Persona id to talk to
    /// * `chat` - Chat id to resume
    /// * `new` - Start a fresh chat instead of resuming the latest
    ///
    /// # Errors
    ///
    /// Returns error if the persona or chat cannot be resolved, or readline
    /// initialization fails
    pub async fn run_chat(
        ctx: AppContext,
        persona: Option<String>,
        chat: Option<String>,
        new: bool,
    ) -> Result<()> {
        let start_persona = resolve_persona(&ctx, persona.as_deref())?;
        let chat_id = resolve_chat(&ctx, &start_persona, chat.as_deref(), new)?;
        tracing::info!(persona = %start_persona.id, chat_id = %chat_id, "Starting chat session");

        let mut session = ChatSession::new(ctx.catalog.clone(), ctx.ingestor()?);
        let mut rl = DefaultEditor::new()?;

        print_welcome(&ctx);
        show_active_chat(&ctx);

        loop {
            let prompt = prompt_for(&ctx);
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);

                    match parse_special_command(trimmed) {
                        Ok(SpecialCommand::None) => {
                            session.set_input(trimmed);
                            send_turn(&mut session).await;
                        }
                        Ok(SpecialCommand::Exit) => break,
                        Ok(command) => {
                            if let Err(e) = handle_special(&ctx, &session, command) {
                                eprintln!("{}", format!("Error: {}", e).red());
                            }
                        }
                        Err(e) => eprintln!("{}", e.to_string().red()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        ctx.store.flush();
        println!("Goodbye!");
        Ok(())
    }

    fn prompt_for(ctx: &AppContext) -> String {
        let persona = ctx
            .store
            .active_persona_id()
            .and_then(|id| ctx.catalog.get(&id).map(|p| p.name.clone()))
            .unwrap_or_else(|| "?".to_string());
        match ctx.store.active_chat_id() {
            Some(id) => format!("[{} #{}] >> ", persona, id),
            None => format!("[{}] >> ", persona),
        }
    }

    fn print_welcome(ctx: &AppContext) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║              PersonaChat Interactive Mode                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        if let Some(persona) = ctx
            .store
            .active_persona_id()
            .and_then(|id| ctx.catalog.get(&id))
        {
            println!("Talking to {}", persona.name.green().bold());
            if !persona.description.is_empty() {
                println!("{}", persona.description.dimmed());
            }
        }
        println!("Type '/help' for available commands, 'exit' to quit\n");
    }

    fn show_active_chat(ctx: &AppContext) {
        let Some(chat) = ctx.store.get_active_chat() else {
            println!("{}", "No active chat. Use /new to start one.".yellow());
            return;
        };
        let name = ctx
            .catalog
            .get(&chat.persona_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| chat.persona_id.to_string());
        println!("{} {}\n", chat.title.bold(), format!("#{}", chat.id).dimmed());
        print_transcript(&chat, &name);
    }

    fn show_sidebar(ctx: &AppContext) {
        if !ctx.store.sidebar_open() {
            return;
        }
        let Some(persona_id) = ctx.store.active_persona_id() else {
            return;
        };
        let chats = ctx.store.list_chats(&persona_id);
        if !chats.is_empty() {
            chat_table(&chats, ctx.store.active_chat_id(), false).printstd();
            println!();
        }
    }

    fn handle_special(ctx: &AppContext, session: &ChatSession, command: SpecialCommand) -> Result<()> {
        match command {
            SpecialCommand::Help => print_help(),
            SpecialCommand::NewChat => {
                let chat_id = session.new_chat()?;
                println!("{}", format!("Started chat {}", chat_id).green());
                show_sidebar(ctx);
            }
            SpecialCommand::ListChats => {
                let persona_id = ctx.store.active_persona_id().ok_or_else(|| {
                    PersonaChatError::InvalidInput("no persona selected".to_string())
                })?;
                let chats = ctx.store.list_chats(&persona_id);
                if chats.is_empty() {
                    println!("{}", "No chats yet. Use /new to start one.".yellow());
                } else {
                    chat_table(&chats, ctx.store.active_chat_id(), false).printstd();
                    println!();
                }
            }
            SpecialCommand::SwitchChat(chat_id) => {
                ctx.store.set_active_chat(chat_id)?;
                show_sidebar(ctx);
                show_active_chat(ctx);
            }
            SpecialCommand::DeleteChat(target) => {
                let chat_id = target
                    .or_else(|| ctx.store.active_chat_id())
                    .ok_or_else(|| PersonaChatError::InvalidInput("no active chat".to_string()))?;
                if ctx.store.chat(chat_id).is_none() {
                    return Err(PersonaChatError::NotFound(format!("chat {}", chat_id)).into());
                }
                ctx.store.delete_chat(chat_id);
                println!("{}", format!("Deleted chat {}", chat_id).green());
                if ctx.store.active_chat_id().is_none() {
                    println!("{}", "No active chat. Use /new or /switch <id>.".yellow());
                }
                show_sidebar(ctx);
            }
            SpecialCommand::RenameChat(title) => {
                let chat_id = ctx
                    .store
                    .active_chat_id()
                    .ok_or_else(|| PersonaChatError::InvalidInput("no active chat".to_string()))?;
                ctx.store.rename_chat(chat_id, &title)?;
                println!("{}", format!("Renamed chat {} to {}", chat_id, title).green());
            }
            SpecialCommand::SwitchPersona(persona_id) => {
                session.select_persona(&persona_id)?;
                if let Some(latest) = ctx.store.list_chats(&persona_id).first() {
                    ctx.store.set_active_chat(latest.id)?;
                }
                if let Some(persona) = ctx.catalog.get(&persona_id) {
                    println!("Now talking to {}", persona.name.green().bold());
                }
                show_sidebar(ctx);
                show_active_chat(ctx);
            }
            SpecialCommand::ListPersonas => {
                super::personas::persona_table(&ctx.catalog, &ctx.store).printstd();
                println!();
            }
            SpecialCommand::ShowUsage(granularity) => match granularity {
                Some(granularity) => {
                    super::usage::print_usage(&ctx.store.usage_records(), granularity)
                }
                None => {
                    if let Some(chat_id) = ctx.store.active_chat_id() {
                        let usage = ctx.store.chat_usage(chat_id);
                        println!(
                            "This chat: input {}, output {}",
                            usage.total_input_tokens().to_string().cyan(),
                            usage.total_output_tokens().to_string().cyan()
                        );
                    }
                    let totals = ctx.store.total_usage();
                    println!(
                        "All chats: input {}, output {}\n",
                        totals.input.to_string().cyan(),
                        totals.output.to_string().cyan()
                    );
                }
            },
            SpecialCommand::ToggleSidebar => {
                let open = ctx.store.toggle_sidebar();
                println!("Chat list {}", if open { "shown" } else { "hidden" });
                show_sidebar(ctx);
            }
            SpecialCommand::Exit | SpecialCommand::None => {}
        }
        Ok(())
    }

    async fn send_turn(session: &mut ChatSession) {
        let name = session
            .store()
            .active_persona_id()
            .and_then(|id| session.catalog().get(&id).map(|p| p.name.clone()))
            .unwrap_or_default();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    IngestEvent::Started { .. } => {
                        print!("\n{} ", format!("{}:", name).green().bold());
                    }
                    IngestEvent::Delta { text, .. } => print!("{}", text),
                    IngestEvent::ContentStarted { .. } => {}
                    IngestEvent::Finished { .. } => println!("\n"),
                }
                let _ = stdout.flush();
            }
        });

        let outcome = session.submit_with_events(Some(tx)).await;
        let _ = printer.await;

        match outcome {
            TurnOutcome::Dropped(reason) => {
                println!("{}", format!("Not sent: {}", reason).yellow());
            }
            TurnOutcome::Completed(report) => print_report(&report),
        }
    }

    fn print_report(report: &IngestReport) {
        match &report.outcome {
            IngestOutcome::Completed => {}
            IngestOutcome::TransportFailed(reason) => {
                eprintln!("{}", format!("Reply interrupted: {}", reason).red());
            }
            IngestOutcome::ChatGone => {
                println!("{}", "The chat was deleted while the reply streamed.".yellow());
            }
            IngestOutcome::Rejected(reason) => {
                println!("{}", format!("Not sent: {}", reason).yellow());
            }
        }
        if let Some(usage) = report.usage {
            println!(
                "{}\n",
                format!(
                    "[tokens: {} in / {} out]",
                    usage.input_tokens, usage.output_tokens
                )
                .dimmed()
            );
        }
    }

}
