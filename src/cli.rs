//! Command-line interface definition for PersonaChat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chatting, browsing chats and reporting usage.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::usage::Granularity;

/// PersonaChat - talk to historical and fictional personas
///
/// Replies stream in from a remote generation endpoint; chats and token
/// usage are kept in a local store.
#[derive(Parser, Debug, Clone)]
#[command(name = "personachat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the store location from config
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    /// Override the generation endpoint URL from config
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Keep everything in memory; nothing is read from or written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for PersonaChat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat with a persona
    Chat {
        /// Persona to talk to (defaults to config, then the first persona)
        #[arg(short, long)]
        persona: Option<String>,

        /// Resume an existing chat by id
        #[arg(long, conflicts_with = "new")]
        chat: Option<String>,

        /// Always start a fresh chat
        #[arg(short, long)]
        new: bool,
    },

    /// List the available personas
    Personas,

    /// Manage stored chats
    Chats {
        /// Chat management subcommand
        #[command(subcommand)]
        command: ChatCommand,
    },

    /// Show token usage totals and a cumulative series
    Usage {
        /// Bucket size for the series (hour, day, week, month)
        #[arg(short, long, default_value = "day")]
        granularity: Granularity,

        /// Only report one chat
        #[arg(long)]
        chat: Option<String>,
    },
}

/// Chat management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ChatCommand {
    /// List chats, optionally for one persona
    List {
        /// Persona to list chats for
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Print a chat transcript
    Show {
        /// Chat id
        id: String,
    },

    /// Delete a chat
    Delete {
        /// Chat id
        id: String,
    },

    /// Rename a chat
    Rename {
        /// Chat id
        id: String,

        /// New title
        title: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            storage_path: None,
            endpoint: None,
            ephemeral: false,
            command: Commands::Personas,
        }
    }
}
