//! Read a prescription image, look up every medicine on it and print the report as JSON.
//!
//! Pass `--extract-only` to skip the lookups.

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use prescription_analyzer::{
    AnalyzerConfig, Pipeline, PrescriptionExtractor,
    prescription::{self, mime_for_path},
    summarize::{ImageInput, backend},
    telemetry::init_tracing,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut extract_only = false;
    let mut path: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--extract-only" => extract_only = true,
            _ => path = Some(PathBuf::from(arg)),
        }
    }
    let Some(path) = path else {
        bail!("usage: analyze_prescription [--extract-only] <image>");
    };

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let image = ImageInput::new(bytes, mime_for_path(&path));

    let config = AnalyzerConfig::from_env()?;
    let backend = backend::from_settings(&config.llm);
    let extractor = PrescriptionExtractor::new(backend.clone());

    if extract_only {
        let prescription = extractor.extract(&image).await?;
        println!("{}", serde_json::to_string_pretty(&prescription)?);
        return Ok(());
    }

    let pipeline = Pipeline::from_config(&config, backend);
    let report = prescription::analyze(&extractor, &pipeline, &image).await?;
    info!(
        "Looked up {}/{} medicines successfully",
        report.medicine_information.success_count, report.medicine_information.total
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
