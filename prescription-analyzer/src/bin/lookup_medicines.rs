//! Look up medicine names given on the command line and print the batch as JSON.
//!
//! `cargo run --bin lookup_medicines -- dolo "pan 40" azithral`

use anyhow::bail;
use prescription_analyzer::{AnalyzerConfig, Pipeline, summarize::backend, telemetry::init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let names: Vec<String> = std::env::args().skip(1).filter(|a| !a.trim().is_empty()).collect();
    if names.is_empty() {
        bail!("usage: lookup_medicines <name> [<name> ...]");
    }

    let config = AnalyzerConfig::from_env()?;
    let pipeline = Pipeline::from_config(&config, backend::from_settings(&config.llm));

    info!("Looking up {} medicines", names.len());
    let batch = pipeline.process(&names).await?;

    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}
