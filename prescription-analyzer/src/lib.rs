pub mod browser;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pacing;
pub mod pipeline;
pub mod prescription;
pub mod search;
pub mod service;
pub mod sites;
pub mod summarize;
pub mod telemetry;

pub use config::AnalyzerConfig;
pub use error::{AnalyzerError, Result};
pub use models::*;
pub use pipeline::Pipeline;
pub use prescription::PrescriptionExtractor;
pub use service::{AppState, build_router, create_app};
