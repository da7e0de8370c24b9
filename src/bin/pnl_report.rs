use anyhow::Context;
use clap::Parser;
use marketreplay::ledger::LedgerRecord;
use marketreplay::report::PnlReport;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pnl_report")]
#[command(about = "Summarise realised PnL of a replay ledger")]
struct Args {
    /// JSON-lines ledger written by the replay server
    #[arg(default_value = "orders.jsonl")]
    ledger: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("marketreplay=warn")
        .init();

    let args = Args::parse();

    let file = File::open(&args.ledger)
        .with_context(|| format!("Failed to open ledger {}", args.ledger.display()))?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read ledger")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(line = index + 1, "Skipping malformed ledger line: {}", e),
        }
    }

    let report = PnlReport::from_records(&records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Ledger: {} ({} orders)", args.ledger.display(), records.len());
        println!();
        report.print_summary();
    }

    Ok(())
}
