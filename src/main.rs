//! PersonaChat - persona-driven chat CLI
//!
#![doc = "PersonaChat - persona-driven chat CLI"]
#![doc = "Main entry point for the PersonaChat application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use personachat::cli::{Cli, Commands};
use personachat::commands::{self, AppContext};
use personachat::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let ctx = AppContext::build(config, cli.ephemeral)?;

    // Execute command
    match cli.command {
        Commands::Chat { persona, chat, new } => {
            tracing::info!("Starting interactive chat mode");
            if let Some(p) = &persona {
                tracing::debug!("Using persona override: {}", p);
            }
            if let Some(c) = &chat {
                tracing::debug!("Resuming chat: {}", c);
            }
            commands::chat::run_chat(ctx, persona, chat, new).await?;
            Ok(())
        }
        Commands::Personas => {
            commands::personas::handle_personas(&ctx.catalog, &ctx.store)?;
            Ok(())
        }
        Commands::Chats { command } => {
            tracing::debug!("Starting chats command");
            commands::chats::handle_chats(command, &ctx.store, &ctx.catalog)?;
            Ok(())
        }
        Commands::Usage { granularity, chat } => {
            tracing::debug!("Starting usage report by {}", granularity);
            commands::usage::handle_usage(&ctx.store, granularity, chat)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so they never mix with streamed replies on stdout.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "personachat=debug"
    } else {
        "personachat=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
