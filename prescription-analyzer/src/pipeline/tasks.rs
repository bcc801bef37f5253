//! The tasks of the per-medicine graph. They share state through the
//! graph context under the keys below.

use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, ERROR_KEY, GraphError, NextAction, Result, Task, TaskResult};
use tracing::{error, info, warn};

use super::Stages;
use crate::browser::BrowserPage;
use crate::models::MedicineRecord;

/// Medicine name as given by the caller
pub const QUERY: &str = "query";
/// Best known name so far
pub const NAME: &str = "name";
pub const URL: &str = "url";
/// Normalized page text
pub const DOCUMENT: &str = "document";
/// Final record of the item
pub const RECORD: &str = "record";

pub const NO_URL_DESCRIPTION: &str = "Failed to find a reliable URL for this medicine";

/// What every task works with: the batch's page and the shared stages.
#[derive(Clone)]
pub struct Workbench {
    pub page: Arc<dyn BrowserPage>,
    pub stages: Arc<Stages>,
}

fn failed(e: impl std::fmt::Display) -> GraphError {
    GraphError::TaskExecutionFailed(e.to_string())
}

pub struct SearchTask(pub Workbench);

#[async_trait]
impl Task for SearchTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: String = context.require(QUERY).await?;
        info!("Searching for {}", query);

        let outcome = self
            .0
            .stages
            .search
            .search(self.0.page.as_ref(), &query)
            .await
            .map_err(failed)?;

        context.set(NAME, &outcome.corrected_name).await?;
        let status = match &outcome.url {
            Some(url) => {
                context.set(URL, url).await?;
                format!("Found {url}")
            }
            None => {
                warn!("Failed to find a URL for {}", query);
                "No result page".to_string()
            }
        };
        Ok(TaskResult::new_with_status(None, NextAction::Continue, Some(status)))
    }
}

pub struct ExtractNameTask(pub Workbench);

#[async_trait]
impl Task for ExtractNameTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let url: String = context.require(URL).await?;
        if let Some(name) = self.0.stages.names.extract(self.0.page.as_ref(), &url).await {
            info!("Identified medicine name: {}", name);
            context.set(NAME, &name).await?;
        }
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct NormalizeTask(pub Workbench);

#[async_trait]
impl Task for NormalizeTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let url: String = context.require(URL).await?;
        let html = self.0.page.content().await.map_err(failed)?;
        let document = self.0.stages.normalizer.normalize(&html, &url);
        info!(chars = document.chars().count(), "Page content normalized");
        context.set(DOCUMENT, &document).await?;
        Ok(TaskResult::new(None, NextAction::Continue))
    }
}

pub struct SummarizeTask(pub Workbench);

#[async_trait]
impl Task for SummarizeTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let document: String = context.require(DOCUMENT).await?;
        let name: String = context.require(NAME).await?;
        let url: String = context.require(URL).await?;

        let mut record = self.0.stages.summarizer.summarize(&document, &name).await;
        record.url = url;
        context.set(RECORD, &record).await?;
        Ok(TaskResult::new_with_status(
            Some(record.description.clone()),
            NextAction::End,
            Some(format!("Summarized {}", record.medicine_name)),
        ))
    }
}

/// Terminal task when the search opened no page.
pub struct UnresolvedTask;

#[async_trait]
impl Task for UnresolvedTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: String = context.require(QUERY).await?;
        context
            .set(RECORD, MedicineRecord::placeholder(query, NO_URL_DESCRIPTION))
            .await?;
        Ok(TaskResult::new(Some(NO_URL_DESCRIPTION.to_string()), NextAction::End))
    }
}

/// Failure handler: turns the recorded error into a placeholder record.
pub struct FailedTask;

#[async_trait]
impl Task for FailedTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: String = context.require(QUERY).await?;
        let message: String = context
            .get(ERROR_KEY)
            .await
            .unwrap_or_else(|| "unknown failure".to_string());
        error!("Error processing {}: {}", query, message);
        let description = format!("Error: {message}");
        context
            .set(RECORD, MedicineRecord::placeholder(query, description.clone()))
            .await?;
        Ok(TaskResult::new(Some(description), NextAction::End))
    }
}
