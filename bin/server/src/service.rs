use std::sync::Arc;

use promptopt_core::{
    llm_client::{LlmConfig, OpenAiClient},
    progress::{ProgressRecord, ProgressTracker, ProgressUpdate},
    runner::run_gepa,
    scorers::FunctionRegistry,
    store::{EvalStore, MemoryStore},
    LlmClient,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::config::Settings;

/// Number of background workers executing optimization runs. Runs are
/// long chains of network calls; they must never occupy request handlers.
const WORKER_COUNT: usize = 2;

const JOB_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Optimization config {0} not found")]
    NotFound(i64),

    #[error("Optimization for config {0} is already running")]
    AlreadyRunning(i64),

    #[error("Failed to enqueue optimization run: {0}")]
    Internal(String),
}

/// Service layer owning the stores, the LLM client, and the worker pool.
pub struct OptimizerService {
    store: Arc<MemoryStore>,
    progress: ProgressTracker,
    jobs: mpsc::Sender<i64>,
}

impl OptimizerService {
    /// Create a service backed by an OpenAI-compatible LLM client.
    pub fn new(settings: Settings) -> Result<Self, anyhow::Error> {
        let mut llm_config = LlmConfig::new().with_api_key(settings.openai_api_key);
        if let Some(base_url) = settings.openai_base_url {
            llm_config = llm_config.with_base_url(base_url);
        }
        let llm = Arc::new(
            OpenAiClient::new(llm_config)
                .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {:?}", e))?,
        );
        Ok(Self::with_components(Arc::new(MemoryStore::new()), llm))
    }

    /// Create a service from explicit components (tests inject mocks here).
    pub fn with_components(store: Arc<MemoryStore>, llm: Arc<dyn LlmClient>) -> Self {
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let progress = ProgressTracker::new();
        let (jobs, receiver) = mpsc::channel::<i64>(JOB_QUEUE_DEPTH);

        let receiver = Arc::new(Mutex::new(receiver));
        for worker_id in 0..WORKER_COUNT {
            let receiver = receiver.clone();
            let store = store.clone();
            let llm = llm.clone();
            let registry = registry.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(config_id) = job else {
                        break;
                    };
                    info!(worker_id, config_id, "picked up optimization run");
                    run_job(store.as_ref(), llm.clone(), registry.clone(), &progress, config_id)
                        .await;
                }
            });
        }

        Self {
            store,
            progress,
            jobs,
        }
    }

    /// Accept an optimization run for background execution. Rejects with
    /// a conflict while a run for the same config is still live.
    pub async fn start_optimization(&self, config_id: i64) -> Result<(), StartError> {
        let config = self
            .store
            .get_optimization_config(config_id)
            .await
            .map_err(|e| StartError::Internal(e.to_string()))?
            .ok_or(StartError::NotFound(config_id))?;

        // Check-and-claim under one lock so two simultaneous starts
        // cannot both slip past the guard.
        if !self.progress.try_begin(config_id) {
            return Err(StartError::AlreadyRunning(config_id));
        }

        self.progress.update(
            config_id,
            ProgressUpdate::new()
                .max_iterations(config.max_metric_calls)
                .message("Queued for optimization..."),
        );

        self.jobs
            .send(config_id)
            .await
            .map_err(|e| StartError::Internal(e.to_string()))
    }

    pub fn get_progress(&self, config_id: i64) -> Option<ProgressRecord> {
        self.progress.get(config_id)
    }
}

async fn run_job(
    store: &dyn EvalStore,
    llm: Arc<dyn LlmClient>,
    registry: Arc<FunctionRegistry>,
    progress: &ProgressTracker,
    config_id: i64,
) {
    let config = match store.get_optimization_config(config_id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            progress.set_error(config_id, format!("Optimization config {} not found", config_id));
            return;
        }
        Err(e) => {
            progress.set_error(config_id, format!("Failed to load config: {}", e));
            return;
        }
    };

    // run_gepa records its own failure in the progress tracker; the
    // error here is only worth a log line.
    match run_gepa(store, llm, registry, progress, &config).await {
        Ok(outcome) => info!(
            config_id,
            score = outcome.score,
            new_prompt_id = outcome.new_prompt_id,
            "optimization run completed"
        ),
        Err(e) => warn!(config_id, error = %e, "optimization run failed"),
    }
}
