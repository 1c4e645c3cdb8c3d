//! Application state wiring the runner to the configured stores.
//!
//! The core runner is generic over its checkpoint store, output store and
//! tool transport; AppState pins them to the concrete infra implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use waypoint_core::tool::registry::ToolRegistry;
use waypoint_core::workflow::checkpoint::CheckpointManager;
use waypoint_core::workflow::definition::WorkflowCatalog;
use waypoint_core::workflow::executor::StepExecutor;
use waypoint_core::workflow::runner::{RunObserver, WorkflowRunner};
use waypoint_infra::checkpoint::CheckpointBackend;
use waypoint_infra::config::{load_config, load_config_file, tools_file, workflows_dir};
use waypoint_infra::filesystem::resolve_data_dir;
use waypoint_infra::output::fs::FsOutputStore;
use waypoint_infra::tool::{DispatchInvoker, HttpInvoker, ProcessInvoker};
use waypoint_types::config::WaypointConfig;

/// Concrete runner type pinned to infra implementations.
pub type AppRunner = WorkflowRunner<CheckpointBackend, FsOutputStore, DispatchInvoker>;

/// Where state comes from; filled from global CLI flags.
#[derive(Debug, Default, Clone)]
pub struct StateOptions {
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: WaypointConfig,
    pub tools_file: PathBuf,
    pub workflows_dir: PathBuf,
    pub registry: Arc<ToolRegistry>,
    pub catalog: WorkflowCatalog,
    pub runner: AppRunner,
}

impl AppState {
    /// Resolve the data dir, load config, registry and catalog, and open the
    /// configured checkpoint store.
    pub async fn init(opts: StateOptions, observer: Option<Arc<dyn RunObserver>>) -> anyhow::Result<Self> {
        let data_dir = opts.data_dir.unwrap_or_else(resolve_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = match &opts.config {
            Some(path) => load_config_file(path).await?,
            None => load_config(&data_dir).await,
        };

        let tools_path = tools_file(&config, &data_dir);
        let registry = Arc::new(
            ToolRegistry::load_file(&tools_path)
                .with_context(|| format!("failed to load tool registry {}", tools_path.display()))?,
        );

        let defs_dir = workflows_dir(&config, &data_dir);
        let catalog = WorkflowCatalog::load_dir(&defs_dir)
            .with_context(|| format!("failed to load workflows from {}", defs_dir.display()))?;

        let store = CheckpointBackend::open(&config, &data_dir).await?;
        let store_kind = store.kind();
        let outputs = FsOutputStore::new(&data_dir);

        let invoker = DispatchInvoker::new(ProcessInvoker::new(data_dir.clone()), HttpInvoker::new());
        let executor = StepExecutor::new(
            invoker,
            config.retry.clone(),
            Duration::from_secs(config.default_step_timeout_secs),
        );

        let mut runner = WorkflowRunner::new(
            registry.clone(),
            CheckpointManager::new(store, outputs),
            executor,
        );
        if let Some(observer) = observer {
            runner = runner.with_observer(observer);
        }

        tracing::debug!(
            data_dir = %data_dir.display(),
            store = ?store_kind,
            tools = registry.len(),
            workflows = catalog.len(),
            "application state ready"
        );

        Ok(Self {
            data_dir,
            config,
            tools_file: tools_path,
            workflows_dir: defs_dir,
            registry,
            catalog,
            runner,
        })
    }

    /// Refuse to run anything while a catalog definition names a tool the
    /// registry does not know.
    pub fn ensure_catalog(&self) -> anyhow::Result<()> {
        for (path, def) in self.catalog.iter() {
            self.registry
                .ensure_workflow(def)
                .with_context(|| format!("workflow '{}' ({})", def.name, path.display()))?;
        }
        Ok(())
    }
}
