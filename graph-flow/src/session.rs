use crate::context::Context;

/// One run through a graph: where it is, where it has been, and its data.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub graph_id: String,
    pub current_task_id: String,
    pub status_message: Option<String>,
    /// Task ids in the order they were executed
    pub history: Vec<String>,
    pub context: Context,
}

impl Session {
    pub fn new_from_task(sid: impl Into<String>, task_name: &str) -> Self {
        Self {
            id: sid.into(),
            graph_id: "default".to_string(),
            current_task_id: task_name.to_string(),
            status_message: None,
            history: Vec::new(),
            context: Context::new(),
        }
    }

    pub fn with_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }
}
