//! Exactly-once terminal side effects for the active job.
//!
//! [`CompletionCoordinator`] watches [`SessionSnapshot`]s together with
//! the shared session store and drives the four terminal paths:
//!
//! * completion: persist the report, announce it, redirect to it, release
//! * server error with `should_delete`: announce, delete, release, go to
//!   the listing
//! * stall: a disconnected or failed job is released after a grace period
//! * cleanup: disconnect and clear the stored job id
//!
//! Each path is guarded by a latch that flips once per job id. Latches
//! are checked and set under one mutex; collaborator calls happen after
//! the mutex is released.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use quest_core::error_category::ErrorCategory;
use quest_core::routes::Route;
use quest_core::status::{ConnectionStatus, ReportStatus};
use quest_core::types::JobId;
use quest_store::SharedSessionStore;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::collaborators::{
    Navigator, Notification, Notifier, ReportService, ReportUpdate, SessionControl,
};
use crate::config::CoordinatorConfig;
use crate::snapshot::SessionSnapshot;
use crate::timers::{TimerHandle, TimerScope};

/// Shown when a server error carries no message.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Success toast shown before the redirect.
pub const COMPLETION_MESSAGE: &str = "Report completed! Redirecting to your report...";

/// Buffer for cleanup notifications.
const CLEANUP_CHANNEL_CAPACITY: usize = 16;

/// External systems the coordinator acts on.
#[derive(Clone)]
pub struct Collaborators {
    pub reports: Arc<dyn ReportService>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub session: Arc<dyn SessionControl>,
}

/// Reacts to session snapshots with one-shot terminal actions.
///
/// Cheap to clone; every clone shares the same latches.
#[derive(Clone)]
pub struct CompletionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    collaborators: Collaborators,
    store: Arc<SharedSessionStore>,
    state: Mutex<CoordinatorState>,
    root: TimerScope,
    cleanup_tx: broadcast::Sender<JobId>,
}

struct CoordinatorState {
    latches: Latches,
    /// Jobs a delete has been issued for. Never cleared.
    deletion_attempted: HashSet<JobId>,
    /// Redirect and cleanup timers of the tracked job.
    job_scope: TimerScope,
    /// Pending stall cleanup.
    grace: Option<TimerHandle>,
}

/// One-shot guards for the tracked job.
#[derive(Debug, Default)]
struct Latches {
    job_id: Option<JobId>,
    cleanup_done: bool,
    update_done: bool,
    redirect_done: bool,
    failure_notified: bool,
}

/// Work decided under the lock and carried out after it is released.
enum Action {
    Notify(Notification),
    Persist(JobId, ReportUpdate),
    Delete(JobId),
}

impl CompletionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        collaborators: Collaborators,
        store: Arc<SharedSessionStore>,
    ) -> Self {
        let root = TimerScope::new();
        let (cleanup_tx, _) = broadcast::channel(CLEANUP_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                collaborators,
                store,
                state: Mutex::new(CoordinatorState {
                    latches: Latches::default(),
                    deletion_attempted: HashSet::new(),
                    job_scope: root.child(),
                    grace: None,
                }),
                root,
                cleanup_tx,
            }),
        }
    }

    /// Evaluate snapshots as they are published until the stream ends or
    /// the coordinator shuts down.
    pub fn run(&self, mut snapshots: broadcast::Receiver<SessionSnapshot>) -> JoinHandle<()> {
        let this = self.clone();
        self.inner.root.spawn(async move {
            loop {
                match snapshots.recv().await {
                    Ok(snapshot) => this.evaluate(&snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Coordinator lagged behind session snapshots");
                        let current = this.inner.collaborators.session.snapshot();
                        this.evaluate(&current);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Job ids released by cleanup, in order.
    pub fn subscribe_cleanups(&self) -> broadcast::Receiver<JobId> {
        self.inner.cleanup_tx.subscribe()
    }

    /// Cancel every pending redirect and cleanup timer.
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down completion coordinator");
        self.inner.root.cancel();
    }

    /// React to one snapshot of the session.
    pub fn evaluate(&self, snapshot: &SessionSnapshot) {
        let Some(job_id) = self.inner.store.get() else {
            if let Some(grace) = self.lock().grace.take() {
                grace.cancel();
            }
            return;
        };

        // A snapshot of some other job says nothing about this one.
        if snapshot.job_id.as_ref().is_some_and(|id| *id != job_id) {
            return;
        }

        let actions = {
            let mut state = self.lock();
            self.track(&mut state, &job_id);

            let mut actions = Vec::new();
            self.check_completion(&mut state, &job_id, snapshot, &mut actions);
            self.check_deletion(&mut state, &job_id, snapshot, &mut actions);
            self.check_failure(&mut state, snapshot, &mut actions);
            self.check_stalled(&mut state, &job_id, snapshot);
            actions
        };

        for action in actions {
            self.perform(action);
        }
    }

    // ---- paths ----

    fn check_completion(
        &self,
        state: &mut CoordinatorState,
        job_id: &JobId,
        snapshot: &SessionSnapshot,
        actions: &mut Vec<Action>,
    ) {
        if state.latches.update_done || !snapshot.chunking_complete {
            return;
        }
        let Some(artifact) = snapshot.artifact.as_deref() else {
            return;
        };

        state.latches.update_done = true;
        tracing::info!(job_id = %job_id, "Report complete, persisting");
        actions.push(Action::Persist(job_id.clone(), ReportUpdate::completed(artifact)));
        actions.push(Action::Notify(Notification::success(COMPLETION_MESSAGE)));

        if !state.latches.redirect_done {
            state.latches.redirect_done = true;
            let this = self.clone();
            let job = job_id.clone();
            let redirect_delay = self.inner.config.redirect_delay;
            let cleanup_delay = self.inner.config.cleanup_after_redirect;
            state.job_scope.after(redirect_delay, async move {
                this.inner
                    .collaborators
                    .navigator
                    .navigate(Route::Detail(job.clone()));
                tokio::time::sleep(cleanup_delay).await;
                this.cleanup(&job);
            });
        }
    }

    fn check_deletion(
        &self,
        state: &mut CoordinatorState,
        job_id: &JobId,
        snapshot: &SessionSnapshot,
        actions: &mut Vec<Action>,
    ) {
        let Some(message) = snapshot.deletion_request() else {
            return;
        };
        if !state.deletion_attempted.insert(job_id.clone()) {
            return;
        }

        let message = if message.is_empty() {
            UNKNOWN_ERROR
        } else {
            message
        };
        tracing::warn!(job_id = %job_id, error = %message, "Server asked for report deletion");
        actions.push(Action::Notify(failure_notification(message)));
        actions.push(Action::Delete(job_id.clone()));
    }

    /// One persistent notice for failures that do not delete the report.
    fn check_failure(
        &self,
        state: &mut CoordinatorState,
        snapshot: &SessionSnapshot,
        actions: &mut Vec<Action>,
    ) {
        if state.latches.failure_notified
            || snapshot.report_status != ReportStatus::Error
            || snapshot.deletion_request().is_some()
        {
            return;
        }
        state.latches.failure_notified = true;
        let message = snapshot
            .error
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_ERROR);
        actions.push(Action::Notify(failure_notification(message)));
    }

    fn check_stalled(
        &self,
        state: &mut CoordinatorState,
        job_id: &JobId,
        snapshot: &SessionSnapshot,
    ) {
        let failed =
            snapshot.report_status == ReportStatus::Error && snapshot.deletion_request().is_none();
        let stalled = !state.latches.cleanup_done
            && (snapshot.connection_status == ConnectionStatus::Disconnected || failed);

        if !stalled {
            if let Some(grace) = state.grace.take() {
                tracing::debug!(job_id = %job_id, "Session recovered, dropping pending cleanup");
                grace.cancel();
            }
            return;
        }

        if state.grace.as_ref().is_some_and(|g| !g.is_cancelled()) {
            return;
        }

        let grace = self.inner.config.disconnect_grace;
        tracing::info!(
            job_id = %job_id,
            connection_status = %snapshot.connection_status,
            report_status = %snapshot.report_status,
            grace_secs = grace.as_secs_f32(),
            "Session stalled, scheduling cleanup",
        );
        let this = self.clone();
        let job = job_id.clone();
        state.grace = Some(
            state
                .job_scope
                .after(grace, async move { this.cleanup(&job) }),
        );
    }

    // ---- side effects ----

    fn perform(&self, action: Action) {
        match action {
            Action::Notify(notification) => {
                self.inner.collaborators.notifier.notify(notification);
            }
            Action::Persist(job_id, update) => {
                let reports = Arc::clone(&self.inner.collaborators.reports);
                tokio::spawn(async move {
                    match reports.update(&job_id, &update).await {
                        Ok(()) => tracing::info!(job_id = %job_id, "Report persisted"),
                        Err(e) => {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to persist report");
                        }
                    }
                });
            }
            Action::Delete(job_id) => {
                let this = self.clone();
                tokio::spawn(async move {
                    match this.inner.collaborators.reports.delete(&job_id).await {
                        Ok(()) => tracing::info!(job_id = %job_id, "Failed report deleted"),
                        Err(e) => {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to delete report");
                        }
                    }
                    this.cleanup(&job_id);
                    this.redirect_once(&job_id, Route::Listing);
                });
            }
        }
    }

    /// Release the session for `job_id`, once.
    fn cleanup(&self, job_id: &JobId) {
        {
            let mut state = self.lock();
            if state.latches.job_id.as_ref() != Some(job_id) || state.latches.cleanup_done {
                return;
            }
            state.latches.cleanup_done = true;
            if let Some(grace) = state.grace.take() {
                grace.cancel();
            }
        }

        tracing::info!(job_id = %job_id, "Releasing job session");
        self.inner.collaborators.session.disconnect();

        // Another client may already have moved on to a different job.
        if self.inner.store.get().as_ref() == Some(job_id) {
            if let Err(e) = self.inner.store.set(None) {
                tracing::error!(job_id = %job_id, error = %e, "Failed to clear active job");
            }
        }

        let _ = self.inner.cleanup_tx.send(job_id.clone());
    }

    fn redirect_once(&self, job_id: &JobId, route: Route) {
        {
            let mut state = self.lock();
            if state.latches.job_id.as_ref() != Some(job_id) || state.latches.redirect_done {
                return;
            }
            state.latches.redirect_done = true;
        }
        self.inner.collaborators.navigator.navigate(route);
    }

    // ---- private helpers ----

    /// Start fresh latches when the stored job changes.
    fn track(&self, state: &mut CoordinatorState, job_id: &JobId) {
        if state.latches.job_id.as_ref() == Some(job_id) {
            return;
        }
        tracing::debug!(job_id = %job_id, "Tracking job");
        state.latches = Latches {
            job_id: Some(job_id.clone()),
            ..Latches::default()
        };
        state.job_scope.cancel();
        state.job_scope = self.inner.root.child();
        state.grace = None;
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn failure_notification(message: &str) -> Notification {
    let category = ErrorCategory::classify(message);
    Notification::persistent_error(format!("{category}: Report generation failed"), message)
}
