use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use wavespeed_relay::airtable::AirtableClient;
use wavespeed_relay::config::{self, Config};
use wavespeed_relay::payload::{build_job_payload, RecordFields};
use wavespeed_relay::relay::Flow;

/// Print the job payload the relay would submit for a record, without
/// submitting it or touching the record.
#[derive(Parser, Debug)]
struct Args {
    /// Env file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Which generation table the record lives in
    #[arg(long, value_enum)]
    table: TableArg,

    /// Record ID to inspect
    #[arg(long)]
    record_id: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TableArg {
    Recreator,
    Poses,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    config::load_env_file(args.env_file.as_deref())?;
    let cfg = Config::from_env()?;

    let (flow, table) = match args.table {
        TableArg::Recreator => (Flow::Recreator, cfg.airtable.tables.recreator.as_str()),
        TableArg::Poses => (Flow::Poses, cfg.airtable.tables.poses.as_str()),
    };

    let client = AirtableClient::from_config(&cfg)?;
    let raw = client.get_record(table, &args.record_id).await?;

    println!("Record {} in {}:", args.record_id, table);
    for (name, value) in &raw {
        println!("  {} = {}", name, value);
    }

    let payload = build_job_payload(
        &args.record_id,
        &RecordFields::new(&raw),
        flow.mode(),
        table,
        &cfg.callback_url(),
    );
    println!("Job payload:");
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
