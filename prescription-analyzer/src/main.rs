use prescription_analyzer::{AnalyzerConfig, create_app, telemetry::init_tracing};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AnalyzerConfig::from_env()?;
    let app = create_app(&config);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Prescription Analyzer starting on {}", addr);
    info!("API Documentation available at http://{}/", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Lookup endpoint: POST http://{}/medicines/lookup", addr);
    info!("Prescription endpoint: POST http://{}/prescriptions/analyze", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
