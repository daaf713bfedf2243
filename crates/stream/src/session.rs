//! Wiring of one connection manager, one coordinator and one store view.

use std::sync::Arc;

use quest_core::types::JobId;
use quest_store::SharedSessionStore;
use tokio::task::JoinHandle;

use crate::collaborators::{Navigator, Notifier, ReportService};
use crate::config::{CoordinatorConfig, StreamConfig};
use crate::connection::ConnectionManager;
use crate::coordinator::{Collaborators, CompletionCoordinator};
use crate::transport::Transport;

/// A client following the active job from start to release.
pub struct StreamSession {
    manager: ConnectionManager,
    coordinator: CompletionCoordinator,
    store: Arc<SharedSessionStore>,
    coordinator_task: JoinHandle<()>,
}

impl StreamSession {
    /// Build the manager and coordinator and start evaluating snapshots.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        stream_config: StreamConfig,
        coordinator_config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        store: Arc<SharedSessionStore>,
        reports: Arc<dyn ReportService>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let manager = ConnectionManager::new(stream_config, transport);
        let coordinator = CompletionCoordinator::new(
            coordinator_config,
            Collaborators {
                reports,
                navigator,
                notifier,
                session: Arc::new(manager.clone()),
            },
            Arc::clone(&store),
        );
        // Subscribe before anything can publish.
        let coordinator_task = coordinator.run(manager.subscribe());

        Self {
            manager,
            coordinator,
            store,
            coordinator_task,
        }
    }

    /// Record `job_id` as the active job and connect to it.
    pub fn begin(&self, job_id: JobId) {
        tracing::info!(job_id = %job_id, "Following new job");
        if let Err(e) = self.store.set(Some(job_id.clone())) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist active job");
        }
        self.manager.connect(job_id);
    }

    /// Reconnect to the job recorded in the store, if any.
    pub fn resume(&self) -> Option<JobId> {
        let job_id = self.store.get()?;
        tracing::info!(job_id = %job_id, "Resuming stored job");
        self.manager.connect(job_id.clone());
        Some(job_id)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn coordinator(&self) -> &CompletionCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<SharedSessionStore> {
        &self.store
    }

    /// Disconnect and cancel every pending timer. The stored job id is
    /// kept so a later session can resume it.
    pub fn shutdown(self) {
        self.coordinator.shutdown();
        self.manager.disconnect();
        self.coordinator_task.abort();
        tracing::info!("Stream session shut down");
    }
}
