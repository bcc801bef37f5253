use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    context::Context,
    error::{GraphError, Result},
    session::Session,
    task::{NextAction, Task},
};

/// Context key under which a failed task's error message is stored before
/// the failure task runs.
pub const ERROR_KEY: &str = "graph_flow.error";

const DEFAULT_MAX_STEPS: usize = 64;

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Edge between tasks in the graph
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

/// A graph of tasks that can be executed
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
    failure_task_id: Option<String>,
    max_steps: usize,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: HashMap::new(),
            edges: Vec::new(),
            start_task_id: None,
            failure_task_id: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Create a session positioned on the start task.
    pub fn start_session(&self, session_id: impl Into<String>) -> Result<Session> {
        let start = self
            .start_task_id
            .as_deref()
            .ok_or_else(|| GraphError::MissingStartTask(self.id.clone()))?;
        Ok(Session::new_from_task(session_id, start).with_graph(self.id.clone()))
    }

    /// Run the session from its current task until a task ends it, no edge
    /// leads anywhere, or a failure is recorded.
    ///
    /// A task returning `Err` does not abort the run when a failure task is
    /// registered: the error message is written to [`ERROR_KEY`] and the
    /// session moves to the failure task, whose result closes the run with
    /// [`ExecutionStatus::Failed`]. Only structural problems (unknown task,
    /// step limit) are returned as `Err`.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let mut failure: Option<String> = None;
        let mut steps = 0;

        loop {
            if steps >= self.max_steps {
                return Err(GraphError::StepLimitExceeded(self.max_steps));
            }
            steps += 1;

            let task_id = session.current_task_id.clone();
            let task = self
                .get_task(&task_id)
                .ok_or_else(|| GraphError::TaskNotFound(task_id.clone()))?;
            session.history.push(task_id.clone());
            debug!(graph = %self.id, session = %session.id, task = %task_id, "running task");

            let mut result = match task.run(session.context.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        graph = %self.id,
                        session = %session.id,
                        task = %task_id,
                        error = %message,
                        "task failed"
                    );
                    match &self.failure_task_id {
                        Some(failure_task) if failure.is_none() && *failure_task != task_id => {
                            session.context.set(ERROR_KEY, &message).await?;
                            session.current_task_id = failure_task.clone();
                            failure = Some(message);
                            continue;
                        }
                        _ => {
                            return Ok(ExecutionResult {
                                response: None,
                                status: ExecutionStatus::Failed(failure.unwrap_or(message)),
                                steps,
                            });
                        }
                    }
                }
            };
            result.task_id = task_id.clone();
            if result.status_message.is_some() {
                session.status_message = result.status_message.clone();
            }

            let next = match &result.next_action {
                NextAction::Continue => self.find_next_task(&task_id, &session.context),
                NextAction::GoTo(target) => {
                    if !self.tasks.contains_key(target) {
                        return Err(GraphError::TaskNotFound(target.clone()));
                    }
                    Some(target.clone())
                }
                NextAction::End => None,
            };

            match next {
                Some(next_task_id) if failure.is_none() => session.current_task_id = next_task_id,
                _ => {
                    let status = match failure {
                        Some(message) => ExecutionStatus::Failed(message),
                        None => ExecutionStatus::Completed,
                    };
                    return Ok(ExecutionResult {
                        response: result.response,
                        status,
                        steps,
                    });
                }
            }
        }
    }

    /// Find the next task: the first conditional edge whose condition holds,
    /// otherwise the first unconditional edge.
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        let outgoing: Vec<&Edge> = self
            .edges
            .iter()
            .filter(|e| e.from == current_task_id)
            .collect();

        outgoing
            .iter()
            .find(|e| e.condition.as_ref().is_some_and(|condition| condition(context)))
            .or_else(|| outgoing.iter().find(|e| e.condition.is_none()))
            .map(|e| e.to.clone())
    }

    /// Get the start task ID
    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    /// Get a task by ID
    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).cloned()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    /// Add a task; the first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Route any task error to `task_id` instead of stopping the session.
    pub fn on_failure(mut self, task_id: impl Into<String>) -> Self {
        self.graph.failure_task_id = Some(task_id.into());
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.graph.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Outcome of [`Graph::execute_session`]
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
    /// Number of tasks executed, failure task included
    pub steps: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The session reached a terminal task
    Completed,
    /// A task failed; carries the first error message
    Failed(String),
}
