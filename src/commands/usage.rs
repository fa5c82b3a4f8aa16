//! Token usage report

use crate::error::Result;
use crate::store::{ChatId, ChatStore};
use crate::usage::{bucket, Granularity, UsagePoint, UsageRecord, UsageTotals};
use colored::Colorize;
use prettytable::{format, Table};

/// Builds the cumulative series table
pub fn series_table(points: &[UsagePoint]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "Period".bold(),
        "Input (cumulative)".bold(),
        "Output (cumulative)".bold(),
        "Total".bold()
    ]);
    for point in points {
        table.add_row(prettytable::row![
            point.label,
            r->point.input,
            r->point.output,
            r->point.input + point.output
        ]);
    }
    table
}

/// Prints totals and the cumulative series for a set of records
pub fn print_usage(records: &[UsageRecord], granularity: Granularity) {
    let totals = UsageTotals::from_records(records);
    println!(
        "\n{} input {}, output {}, total {}",
        "Tokens:".bold(),
        totals.input.to_string().cyan(),
        totals.output.to_string().cyan(),
        (totals.input + totals.output).to_string().cyan()
    );

    let points = bucket(records, granularity);
    if points.is_empty() {
        println!("{}", "No token usage recorded yet.".yellow());
        println!();
        return;
    }

    println!("\nCumulative usage by {}:", granularity);
    series_table(&points).printstd();
    println!();
}

/// Handle the usage command
pub fn handle_usage(store: &ChatStore, granularity: Granularity, chat: Option<String>) -> Result<()> {
    let records = match chat {
        Some(id) => {
            let chat_id: ChatId = id.parse()?;
            vec![store.chat_usage(chat_id)]
        }
        None => store.usage_records(),
    };
    print_usage(&records, granularity);
    Ok(())
}
