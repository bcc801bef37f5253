//! Batch orchestration: one browser session, one graph run per medicine.
//!
//! Each medicine moves through `Searching → Extracting → Normalizing →
//! Summarizing`. A search that opens no page ends in `Unresolved`; a failing
//! task ends in `Failed`. Both still produce a record, so every input name
//! yields exactly one entry in the batch.

pub mod tasks;

use std::any::type_name;
use std::sync::Arc;

use graph_flow::{ExecutionStatus, Graph, GraphBuilder, Task};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserLauncher, BrowserPage, ChromiumLauncher};
use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::models::{BatchResult, MedicineRecord};
use crate::normalize::ContentNormalizer;
use crate::pacing::Pacer;
use crate::search::SearchStage;
use crate::sites::{NameExtractor, SiteRegistry};
use crate::summarize::{GenerativeBackend, Summarizer};
use tasks::{
    ExtractNameTask, FailedTask, NormalizeTask, QUERY, RECORD, SearchTask, SummarizeTask, URL,
    UnresolvedTask, Workbench,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Searching,
    Extracting,
    Normalizing,
    Summarizing,
    Done,
    Unresolved,
    Failed,
}

impl ItemState {
    /// The state a task represents while it runs.
    pub fn from_task_id(task_id: &str) -> Option<Self> {
        let state = if task_id == type_name::<SearchTask>() {
            ItemState::Searching
        } else if task_id == type_name::<ExtractNameTask>() {
            ItemState::Extracting
        } else if task_id == type_name::<NormalizeTask>() {
            ItemState::Normalizing
        } else if task_id == type_name::<SummarizeTask>() {
            ItemState::Summarizing
        } else if task_id == type_name::<UnresolvedTask>() {
            ItemState::Unresolved
        } else if task_id == type_name::<FailedTask>() {
            ItemState::Failed
        } else {
            return None;
        };
        Some(state)
    }

    /// Where an item ends up after its last task finished.
    fn settled(last_task: Option<&str>) -> Self {
        match last_task.and_then(Self::from_task_id) {
            Some(ItemState::Summarizing) => ItemState::Done,
            Some(state @ (ItemState::Unresolved | ItemState::Failed)) => state,
            Some(_) => ItemState::Failed,
            None => ItemState::Pending,
        }
    }
}

/// The per-item stages, shared by every task of a batch.
pub struct Stages {
    pub search: SearchStage,
    pub names: NameExtractor,
    pub normalizer: ContentNormalizer,
    pub summarizer: Summarizer,
}

impl Stages {
    pub fn from_config(config: &AnalyzerConfig, backend: Arc<dyn GenerativeBackend>) -> Self {
        let pacer = Pacer::new(config.pacing_scale);
        let registry = Arc::new(SiteRegistry::default());
        Self {
            search: SearchStage::new(config.search_engine_url.clone(), pacer),
            names: NameExtractor::new(registry.clone()),
            normalizer: ContentNormalizer::new(registry),
            summarizer: Summarizer::new(backend),
        }
    }
}

/// The per-medicine graph over one page.
pub fn build_item_graph(workbench: Workbench) -> Graph {
    let search: Arc<dyn Task> = Arc::new(SearchTask(workbench.clone()));
    let extract: Arc<dyn Task> = Arc::new(ExtractNameTask(workbench.clone()));
    let normalize: Arc<dyn Task> = Arc::new(NormalizeTask(workbench.clone()));
    let summarize: Arc<dyn Task> = Arc::new(SummarizeTask(workbench));
    let unresolved: Arc<dyn Task> = Arc::new(UnresolvedTask);
    let failed: Arc<dyn Task> = Arc::new(FailedTask);

    GraphBuilder::new("medicine_lookup")
        .add_task(search.clone())
        .add_task(extract.clone())
        .add_task(normalize.clone())
        .add_task(summarize.clone())
        .add_task(unresolved.clone())
        .add_task(failed.clone())
        .add_conditional_edge(search.id(), unresolved.id(), |ctx| !ctx.contains(URL))
        .add_edge(search.id(), extract.id())
        .add_edge(extract.id(), normalize.id())
        .add_edge(normalize.id(), summarize.id())
        .on_failure(failed.id())
        .build()
}

pub struct Pipeline {
    launcher: Arc<dyn BrowserLauncher>,
    stages: Arc<Stages>,
    pacer: Pacer,
}

impl Pipeline {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, stages: Stages, pacer: Pacer) -> Self {
        Self {
            launcher,
            stages: Arc::new(stages),
            pacer,
        }
    }

    /// Chromium-backed pipeline for the given configuration.
    pub fn from_config(config: &AnalyzerConfig, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self::new(
            Arc::new(ChromiumLauncher::new(config.browser.clone())),
            Stages::from_config(config, backend),
            Pacer::new(config.pacing_scale),
        )
    }

    /// Look up every name in order and aggregate the records.
    ///
    /// Failing to start the browser is the only error; per-item problems
    /// become placeholder records. The browser is closed whatever happens.
    pub async fn process(&self, names: &[String]) -> Result<BatchResult> {
        if names.is_empty() {
            return Ok(BatchResult::new(Vec::new(), 0));
        }

        let session = self.launcher.launch().await?;
        let batch = self.run_batch(session.page(), names).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        info!(
            "Processed {}/{} medicines successfully ({:.1}%)",
            batch.success_count,
            batch.total,
            batch.success_rate()
        );
        Ok(batch)
    }

    async fn run_batch(&self, page: Arc<dyn BrowserPage>, names: &[String]) -> BatchResult {
        let graph = build_item_graph(Workbench {
            page,
            stages: self.stages.clone(),
        });

        let mut records = Vec::with_capacity(names.len());
        let mut success_count = 0;
        for (i, name) in names.iter().enumerate() {
            info!(">>> Processing medicine {}/{}: {}", i + 1, names.len(), name);

            let (state, record) = self.process_item(&graph, i, name).await;
            if counts_as_success(state, &record) {
                success_count += 1;
                info!(?state, "Successfully processed {}", record.medicine_name);
            } else {
                warn!(
                    ?state,
                    "Failed to extract proper information for {}", record.medicine_name
                );
            }
            records.push(record);

            if i + 1 < names.len() {
                self.pacer.delay(2.0, 4.0).await;
            }
        }
        BatchResult::new(records, success_count)
    }

    /// Run one medicine through the graph. Always yields a record.
    pub async fn process_item(
        &self,
        graph: &Graph,
        index: usize,
        name: &str,
    ) -> (ItemState, MedicineRecord) {
        let mut session = match graph.start_session(format!("medicine-{index}")) {
            Ok(session) => session,
            Err(e) => return (ItemState::Failed, error_record(name, e)),
        };
        if let Err(e) = session.context.set(QUERY, name).await {
            return (ItemState::Failed, error_record(name, e));
        }

        let execution = graph.execute_session(&mut session).await;
        let state = ItemState::settled(session.history.last().map(String::as_str));
        let record: Option<MedicineRecord> = session.context.get(RECORD).await;

        match (execution, record) {
            (Ok(result), Some(record)) => {
                debug!(
                    ?state,
                    steps = result.steps,
                    outcome = result.response.as_deref().unwrap_or_default(),
                    last_status = session.status_message.as_deref().unwrap_or_default(),
                    "Finished {}",
                    name
                );
                (state, record)
            }
            (Ok(result), None) => {
                let message = match result.status {
                    ExecutionStatus::Failed(message) => message,
                    ExecutionStatus::Completed => "workflow ended without a record".to_string(),
                };
                error!("Error processing {}: {}", name, message);
                (ItemState::Failed, error_record(name, message))
            }
            (Err(e), _) => {
                error!("Error processing {}: {}", name, e);
                (ItemState::Failed, error_record(name, e))
            }
        }
    }
}

/// Only items that ran the whole lookup and got a real summary count.
///
/// Unresolved and failed items carry placeholder records that must not be
/// counted, whatever their description says.
fn counts_as_success(state: ItemState, record: &MedicineRecord) -> bool {
    state == ItemState::Done && record.is_success()
}

fn error_record(name: &str, e: impl std::fmt::Display) -> MedicineRecord {
    MedicineRecord::placeholder(name, format!("Error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakePage};
    use crate::error::AnalyzerError;
    use crate::summarize::RetryPolicy;
    use crate::summarize::backend::scripted::ScriptedBackend;

    const ENGINE: &str = "https://search.test/";
    const RESULTS: &str = "https://search.test/results";
    const PRODUCT: &str = "https://www.1mg.com/drugs/dolo-650-tablet-74467";

    fn product_page() -> String {
        format!(
            r#"<html><body>
                <nav>menu</nav>
                <div class="DrugHeader__title-content">Dolo 650 Tablet</div>
                <main><h2>Uses</h2><p>{}</p></main>
            </body></html>"#,
            "Dolo 650 Tablet is used to relieve pain and reduce fever. ".repeat(6)
        )
    }

    fn reply(name: &str) -> String {
        format!(
            r#"{{"medicine_name": "{name}", "description": "Paracetamol", "key_benefits": ["Fever"],
                "directions": "After food", "safety_info": "", "relevant_info": ""}}"#
        )
    }

    fn search_page() -> FakePage {
        FakePage::new()
            .with_page(ENGINE, r#"<textarea name="q"></textarea>"#)
            .on_submit(RESULTS)
    }

    fn pipeline(launcher: FakeLauncher, backend: ScriptedBackend) -> (Pipeline, Arc<FakeLauncher>) {
        let launcher = Arc::new(launcher);
        let registry = Arc::new(SiteRegistry::default());
        let stages = Stages {
            search: SearchStage::new(ENGINE, Pacer::instant()),
            names: NameExtractor::new(registry.clone()),
            normalizer: ContentNormalizer::new(registry),
            summarizer: Summarizer::new(Arc::new(backend)).with_policy(RetryPolicy::immediate(2)),
        };
        (Pipeline::new(launcher.clone(), stages, Pacer::instant()), launcher)
    }

    #[tokio::test]
    async fn every_input_yields_one_record() {
        let page = search_page()
            .with_page(RESULTS, &format!(r#"<a href="{PRODUCT}"><h3>Dolo 650</h3></a>"#))
            .with_page(PRODUCT, &product_page());
        let backend = ScriptedBackend::new().reply(&reply("Dolo 650")).reply(&reply("Dolo 650"));
        let (pipeline, launcher) = pipeline(FakeLauncher::new(page), backend);

        let names = vec!["dolo".to_string(), "dolo 650".to_string()];
        let batch = pipeline.process(&names).await.unwrap();

        assert_eq!(batch.total, 2);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.medicines.len(), 1);
        assert_eq!(batch.records[0].url, PRODUCT);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn states_follow_the_happy_path() {
        let page = search_page()
            .with_page(RESULTS, &format!(r#"<a href="{PRODUCT}"><h3>Dolo 650</h3></a>"#))
            .with_page(PRODUCT, &product_page());
        let backend = ScriptedBackend::new().reply(&reply(""));
        let (pipeline, launcher) = pipeline(FakeLauncher::new(page), backend);
        let graph = build_item_graph(Workbench {
            page: launcher.page(),
            stages: pipeline.stages.clone(),
        });

        let (state, record) = pipeline.process_item(&graph, 0, "dolo").await;

        assert_eq!(state, ItemState::Done);
        // empty model name falls back to the name read off the product page
        assert_eq!(record.medicine_name, "Dolo 650 Tablet");
        assert_eq!(record.key_benefits, vec!["Fever"]);
    }

    #[tokio::test]
    async fn missing_url_is_unresolved() {
        let launcher = FakeLauncher::new(search_page());
        let (pipeline, launcher) = pipeline(launcher, ScriptedBackend::new());
        let graph = build_item_graph(Workbench {
            page: launcher.page(),
            stages: pipeline.stages.clone(),
        });

        let (state, record) = pipeline.process_item(&graph, 0, "zzqx").await;

        assert_eq!(state, ItemState::Unresolved);
        assert_eq!(record.medicine_name, "zzqx");
        assert_eq!(record.description, tasks::NO_URL_DESCRIPTION);
        assert_eq!(record.url, "");
    }

    #[tokio::test]
    async fn task_errors_become_error_records() {
        let page = search_page().failing("goto");
        let (pipeline, launcher) = pipeline(FakeLauncher::new(page), ScriptedBackend::new());

        let batch = pipeline.process(&["dolo".to_string()]).await.unwrap();

        let record = &batch.records[0];
        assert_eq!(record.medicine_name, "dolo");
        assert!(record.description.starts_with("Error: "));
        assert_eq!(batch.success_count, 0);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn summarizer_failures_count_as_unsuccessful() {
        let page = search_page()
            .with_page(RESULTS, &format!(r#"<a href="{PRODUCT}"><h3>Dolo 650</h3></a>"#))
            .with_page(PRODUCT, &product_page());
        let backend = ScriptedBackend::new().fail(500).fail(500);
        let (pipeline, _) = pipeline(FakeLauncher::new(page), backend);

        let batch = pipeline.process(&["dolo".to_string()]).await.unwrap();

        assert_eq!(batch.success_count, 0);
        assert!(batch.records[0].description.starts_with("Error extracting information"));
        assert_eq!(batch.records[0].url, PRODUCT);
    }

    #[tokio::test]
    async fn unresolved_items_are_not_counted() {
        let launcher = FakeLauncher::new(search_page());
        let (pipeline, launcher) = pipeline(launcher, ScriptedBackend::new());

        let batch = pipeline.process(&["zzqx".to_string()]).await.unwrap();

        assert_eq!(batch.total, 1);
        assert_eq!(batch.success_count, 0);
        assert_eq!(batch.records[0].description, tasks::NO_URL_DESCRIPTION);
        assert_eq!(batch.success_rate(), 0.0);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn mixed_batch_keeps_order_and_counts_only_summaries() {
        const DOLO_RESULTS: &str = "https://search.test/results/dolo";
        const CRASH_RESULTS: &str = "https://search.test/results/crash";
        const BROKEN: &str = "https://www.1mg.com/drugs/crash-tablet-1";

        let page = search_page()
            .on_query("dolo medicine links", DOLO_RESULTS)
            .on_query("crash medicine links", CRASH_RESULTS)
            .with_page(DOLO_RESULTS, &format!(r#"<a href="{PRODUCT}"><h3>Dolo 650</h3></a>"#))
            .with_page(PRODUCT, &product_page())
            .with_page(CRASH_RESULTS, &format!(r#"<a href="{BROKEN}"><h3>Crash</h3></a>"#))
            .with_page(BROKEN, "<html><body>never read</body></html>")
            .broken_at(BROKEN);
        let backend = ScriptedBackend::new().reply(&reply("Dolo 650"));
        let (pipeline, launcher) = pipeline(FakeLauncher::new(page), backend);

        let names = vec!["dolo".to_string(), "zzqx".to_string(), "crash".to_string()];
        let batch = pipeline.process(&names).await.unwrap();

        assert_eq!(batch.total, 3);
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.records[0].medicine_name, "Dolo 650");
        assert_eq!(batch.records[0].url, PRODUCT);
        assert_eq!(batch.records[1].medicine_name, "zzqx");
        assert_eq!(batch.records[1].description, tasks::NO_URL_DESCRIPTION);
        assert_eq!(batch.records[2].medicine_name, "crash");
        assert!(batch.records[2].description.starts_with("Error: "));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_aborts_the_batch() {
        let (pipeline, _) = pipeline(FakeLauncher::unavailable(), ScriptedBackend::new());
        let err = pipeline.process(&["dolo".to_string()]).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Browser(_)));
    }

    #[tokio::test]
    async fn empty_batches_do_not_start_a_browser() {
        let (pipeline, launcher) = pipeline(FakeLauncher::unavailable(), ScriptedBackend::new());
        let batch = pipeline.process(&[]).await.unwrap();
        assert_eq!(batch.total, 0);
        assert_eq!(launcher.close_count(), 0);
    }

    #[test]
    fn task_ids_map_to_states() {
        assert_eq!(ItemState::from_task_id(type_name::<SearchTask>()), Some(ItemState::Searching));
        assert_eq!(ItemState::settled(Some(type_name::<SummarizeTask>())), ItemState::Done);
        assert_eq!(ItemState::settled(Some(type_name::<NormalizeTask>())), ItemState::Failed);
        assert_eq!(ItemState::settled(None), ItemState::Pending);
    }
}
