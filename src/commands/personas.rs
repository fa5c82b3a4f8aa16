//! Persona listing command

use crate::error::Result;
use crate::persona::PersonaCatalog;
use crate::store::ChatStore;
use colored::Colorize;
use prettytable::{format, Table};

/// Builds the persona table with per-persona chat counts
pub fn persona_table(catalog: &PersonaCatalog, store: &ChatStore) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Chats".bold(),
        "Description".bold()
    ]);
    for persona in catalog.iter() {
        table.add_row(prettytable::row![
            persona.id.as_str().cyan(),
            persona.name,
            store.list_chats(&persona.id).len(),
            persona.description
        ]);
    }
    table
}

/// Handle the personas command
pub fn handle_personas(catalog: &PersonaCatalog, store: &ChatStore) -> Result<()> {
    println!("\nPersonas:");
    persona_table(catalog, store).printstd();
    println!();
    println!(
        "Use {} to start chatting.",
        "personachat chat --persona <ID>".cyan()
    );
    println!();
    Ok(())
}
