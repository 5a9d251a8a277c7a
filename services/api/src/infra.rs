use claimflow::config::WorkflowConfig;
use claimflow::error::{AppError, SeedError};
use claimflow::workflows::approval::{
    ApprovalRuleService, InMemoryBackend, NotificationInbox, SeedData, WorkflowEngine,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Fixture used when no `APP_SEED_PATH` is configured.
pub(crate) const DEFAULT_SEED: &str = include_str!("../fixtures/seed.json");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Collaborators shared by the HTTP routes and the CLI demo.
pub(crate) struct ApprovalStack {
    pub(crate) backend: InMemoryBackend,
    pub(crate) engine: Arc<WorkflowEngine>,
    pub(crate) rules: Arc<ApprovalRuleService>,
    pub(crate) inbox: NotificationInbox,
}

impl ApprovalStack {
    pub(crate) fn new(backend: InMemoryBackend, max_conflict_retries: u32) -> Self {
        let inbox = NotificationInbox::default();
        let engine = WorkflowEngine::new(
            backend.claims.clone(),
            backend.rules.clone(),
            backend.directory.clone(),
            Arc::new(inbox.clone()),
        )
        .with_conflict_retries(max_conflict_retries);
        let rules = ApprovalRuleService::new(backend.rules.clone(), backend.directory.clone());

        Self {
            backend,
            engine: Arc::new(engine),
            rules: Arc::new(rules),
            inbox,
        }
    }
}

pub(crate) fn parse_seed(raw: &str) -> Result<InMemoryBackend, SeedError> {
    let seed: SeedData = serde_json::from_str(raw)?;
    Ok(InMemoryBackend::from_seed(seed)?)
}

pub(crate) fn load_seed(path: Option<&Path>) -> Result<InMemoryBackend, AppError> {
    let backend = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let backend = parse_seed(&raw)?;
            info!(path = %path.display(), "loaded approval fixtures");
            backend
        }
        None => parse_seed(DEFAULT_SEED)?,
    };
    Ok(backend)
}

pub(crate) fn build_stack(config: &WorkflowConfig) -> Result<ApprovalStack, AppError> {
    let backend = load_seed(config.seed_path.as_deref())?;
    Ok(ApprovalStack::new(backend, config.max_conflict_retries))
}
