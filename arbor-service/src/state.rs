use crate::error::AppError;
use arbor_core::{AnalysisRunner, Config, LexicalScorer, NodeIndex, Scorer};
use std::sync::Arc;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub runner: Arc<AnalysisRunner>,
    pub scorer: Arc<dyn Scorer>,
}

impl AppState {
    pub fn new(runner: Arc<AnalysisRunner>) -> Self {
        Self {
            runner,
            scorer: Arc::new(LexicalScorer),
        }
    }

    pub fn config(&self) -> &Config {
        self.runner.config()
    }

    pub fn index(&self) -> Arc<NodeIndex> {
        Arc::clone(self.runner.index())
    }

    /// Run a blocking index operation off the async workers.
    pub async fn with_index<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&NodeIndex) -> arbor_core::Result<T> + Send + 'static,
    {
        let index = self.index();
        tokio::task::spawn_blocking(move || op(&index))
            .await
            .map_err(|err| AppError::internal(format!("index task failed: {err}")))?
            .map_err(AppError::from)
    }
}
