//! Connection manager for the per-job report channel.
//!
//! [`ConnectionManager`] keeps at most one live channel open for the
//! active job. It runs the establishment timeout, the keepalive ping,
//! bounded reconnection after unexpected closes, the stall watchdog and
//! the post-completion disconnect, and feeds every inbound envelope to
//! the [`ChunkReassembler`].
//!
//! State changes are published as [`SessionSnapshot`]s on a
//! [`tokio::sync::broadcast`] channel. Call
//! [`ConnectionManager::subscribe`] to receive them.
//!
//! All state lives behind one mutex that is never held across an await.
//! Each channel gets a generation number; callbacks from a superseded
//! channel see a different generation and are ignored.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use quest_core::status::{ConnectionStatus, ReportStatus};
use quest_core::types::JobId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::StreamConfig;
use crate::envelope::{parse_envelope, Envelope, Ping};
use crate::reassembler::ChunkReassembler;
use crate::snapshot::SessionSnapshot;
use crate::timers::{TimerHandle, TimerScope};
use crate::transport::{InboundFrame, Transport};

/// Broadcast channel capacity for session snapshots.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 256;

/// Floor for the keepalive period; a zero period cannot tick.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the report channel for one job at a time.
///
/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
    snapshot_tx: broadcast::Sender<SessionSnapshot>,
    /// Root of every timer and channel task the manager starts.
    root: TimerScope,
}

struct ManagerState {
    job_id: Option<JobId>,
    connection_status: ConnectionStatus,
    report_status: ReportStatus,
    error: Option<String>,
    reconnect_attempts: u32,
    /// Bumped on every connect and disconnect.
    generation: u64,
    /// Timers that outlive a single channel: watchdog, auto-disconnect.
    job_scope: TimerScope,
    /// The channel task and its pending reconnect. Child of `job_scope`.
    channel_scope: TimerScope,
    /// Task of the most recent channel; the next channel waits for it.
    channel_task: Option<JoinHandle<()>>,
    watchdog: Option<TimerHandle>,
    reassembler: ChunkReassembler,
    last_envelope: Option<Arc<Envelope>>,
}

impl ConnectionManager {
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let root = TimerScope::new();
        let job_scope = root.child();
        let channel_scope = job_scope.child();

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(ManagerState {
                    job_id: None,
                    connection_status: ConnectionStatus::Disconnected,
                    report_status: ReportStatus::NotStarted,
                    error: None,
                    reconnect_attempts: 0,
                    generation: 0,
                    job_scope,
                    channel_scope,
                    channel_task: None,
                    watchdog: None,
                    reassembler: ChunkReassembler::new(),
                    last_envelope: None,
                }),
                snapshot_tx,
                root,
            }),
        }
    }

    /// Subscribe to session snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        snapshot_of(&self.lock())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().connection_status
    }

    pub fn report_status(&self) -> ReportStatus {
        self.lock().report_status
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.lock().job_id.clone()
    }

    /// Timers and channel tasks that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.inner.root.live_tasks()
    }

    /// Open a channel for `job_id`, closing any channel already open.
    ///
    /// Reconnecting to the same job keeps the retry count; switching jobs
    /// resets it and cancels the previous job's timers.
    pub fn connect(&self, job_id: JobId) {
        let mut state = self.lock();

        if state.job_id.as_ref() != Some(&job_id) {
            state.job_scope.cancel();
            state.job_scope = self.inner.root.child();
            state.watchdog = None;
            state.reconnect_attempts = 0;
            state.report_status = ReportStatus::NotStarted;
            state.error = None;
            state.last_envelope = None;
        }

        state.channel_scope.cancel();
        state.channel_scope = state.job_scope.child();
        let previous = state.channel_task.take();

        state.generation += 1;
        let generation = state.generation;
        state.job_id = Some(job_id.clone());
        state.connection_status = ConnectionStatus::Connecting;
        state.reassembler.reset();

        tracing::info!(
            job_id = %job_id,
            generation,
            attempt = state.reconnect_attempts,
            "Connecting to report channel",
        );

        let url = self.inner.config.channel_url(&job_id);
        let this = self.clone();
        let task = state
            .channel_scope
            .spawn(this.run_channel(job_id, url, generation, previous));
        state.channel_task = Some(task);

        self.publish(&state);
    }

    /// Close the channel and cancel every pending timer.
    ///
    /// Safe to call any number of times.
    pub fn disconnect(&self) {
        let mut state = self.lock();

        state.job_scope.cancel();
        state.job_scope = self.inner.root.child();
        state.channel_scope = state.job_scope.child();
        state.watchdog = None;

        let was_active =
            state.job_id.is_some() || state.connection_status != ConnectionStatus::Disconnected;
        let job_id = state.job_id.take();
        state.reconnect_attempts = 0;
        state.connection_status = ConnectionStatus::Disconnected;
        state.generation += 1;

        if was_active {
            tracing::info!(
                job_id = ?job_id.as_ref().map(JobId::as_str),
                "Disconnected from report channel",
            );
            self.publish(&state);
        }
    }

    // ---- channel task ----

    /// Open, pump and close one channel.
    ///
    /// Runs inside the channel scope, so a newer connect or a disconnect
    /// drops this future (and the channel with it) at its next await.
    async fn run_channel(
        self,
        job_id: JobId,
        url: String,
        generation: u64,
        previous: Option<JoinHandle<()>>,
    ) {
        // The superseded channel must be fully closed before we open.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let config = &self.inner.config;
        let opened = time::timeout(config.connect_timeout, self.inner.transport.open(&url)).await;

        let mut channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                self.on_transport_error(generation, ConnectionError::Transport(e.to_string()));
                self.on_close(generation);
                return;
            }
            Err(_) => {
                self.on_establish_timeout(generation);
                return;
            }
        };

        if !self.on_open(generation) {
            return;
        }

        let period = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let ping = Ping::now();
                    if let Err(e) = channel.send(ping.to_json()) {
                        self.on_transport_error(generation, ConnectionError::Transport(e.to_string()));
                        break;
                    }
                    tracing::trace!(job_id = %job_id, timestamp = ping.timestamp, "Sent keepalive ping");
                }
                frame = channel.recv() => match frame {
                    Some(InboundFrame::Text(text)) => self.on_message(generation, &text),
                    Some(InboundFrame::Error(e)) => {
                        self.on_transport_error(generation, ConnectionError::Transport(e));
                    }
                    Some(InboundFrame::Closed(reason)) => {
                        tracing::info!(job_id = %job_id, ?reason, "Report channel closed by server");
                        break;
                    }
                    None => break,
                },
            }
        }

        drop(channel);
        self.on_close(generation);
    }

    // ---- channel callbacks ----

    fn on_open(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }

        state.connection_status = ConnectionStatus::Connected;
        state.error = None;
        state.reconnect_attempts = 0;
        self.set_report_status(&mut state, ReportStatus::InProgress);

        tracing::info!(
            job_id = ?state.job_id.as_ref().map(JobId::as_str),
            generation,
            "Report channel open",
        );
        self.publish(&state);
        true
    }

    fn on_message(&self, generation: u64, text: &str) {
        let envelope = match parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Dropping malformed envelope");
                return;
            }
        };

        let mut state = self.lock();
        if state.generation != generation {
            return;
        }

        if let Envelope::Pong { timestamp } = &envelope {
            tracing::trace!(?timestamp, "Keepalive acknowledged");
            return;
        }

        let next = state.reassembler.apply(&envelope);
        match &envelope {
            Envelope::Connected { message, .. } => {
                tracing::debug!(message = %message, "Server acknowledged subscription");
                state.connection_status = ConnectionStatus::Connected;
            }
            Envelope::Error {
                message,
                should_delete,
            } => {
                tracing::warn!(
                    job_id = ?state.job_id.as_ref().map(JobId::as_str),
                    should_delete,
                    error = %message,
                    "Server reported job failure",
                );
                state.error = Some(message.clone());
            }
            Envelope::Progress { event, message } => {
                tracing::debug!(event = %event, message = %message, "Job progress");
            }
            _ => {}
        }

        if let Some(next) = next {
            self.set_report_status(&mut state, next);
        }
        state.last_envelope = Some(Arc::new(envelope));
        self.publish(&state);
    }

    fn on_transport_error(&self, generation: u64, error: ConnectionError) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        tracing::warn!(
            job_id = ?state.job_id.as_ref().map(JobId::as_str),
            error = %error,
            "Report channel error",
        );
        state.connection_status = ConnectionStatus::Error;
        state.error = Some(error.to_string());
        self.publish(&state);
    }

    fn on_establish_timeout(&self, generation: u64) {
        let retry = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }

            state.connection_status = ConnectionStatus::Error;
            state.error = Some(ConnectionError::EstablishTimeout.to_string());

            let retry = match state.job_id.clone() {
                Some(job_id) => {
                    let policy = self.inner.config.reconnect;
                    match policy.next_attempt(state.reconnect_attempts) {
                        Some(attempt) => {
                            tracing::warn!(
                                job_id = %job_id,
                                attempt,
                                max_attempts = policy.max_attempts,
                                "Report channel timed out while connecting, retrying",
                            );
                            state.reconnect_attempts = attempt;
                            Some(job_id)
                        }
                        None => {
                            self.exhaust(&mut state, &job_id);
                            None
                        }
                    }
                }
                None => None,
            };

            self.publish(&state);
            retry
        };

        if let Some(job_id) = retry {
            self.connect(job_id);
        }
    }

    fn on_close(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }

        state.connection_status = ConnectionStatus::Disconnected;

        if let Some(job_id) = state.job_id.clone() {
            if state.report_status == ReportStatus::InProgress {
                let policy = self.inner.config.reconnect;
                match policy.next_attempt(state.reconnect_attempts) {
                    Some(attempt) => {
                        state.reconnect_attempts = attempt;
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            max_attempts = policy.max_attempts,
                            delay_secs = policy.delay.as_secs(),
                            "Report channel lost, scheduling reconnect",
                        );
                        let this = self.clone();
                        state
                            .channel_scope
                            .after(policy.delay, async move { this.reconnect(generation) });
                    }
                    None => self.exhaust(&mut state, &job_id),
                }
            } else {
                tracing::info!(
                    job_id = %job_id,
                    report_status = %state.report_status,
                    "Report channel closed",
                );
            }
        }

        self.publish(&state);
    }

    // ---- timers ----

    fn reconnect(&self, generation: u64) {
        let job_id = {
            let state = self.lock();
            if state.generation != generation {
                return;
            }
            state.job_id.clone()
        };
        if let Some(job_id) = job_id {
            self.connect(job_id);
        }
    }

    fn on_stall(&self, job_id: JobId) {
        let mut state = self.lock();
        if state.job_id.as_ref() != Some(&job_id) || state.report_status != ReportStatus::InProgress
        {
            return;
        }
        tracing::warn!(
            job_id = %job_id,
            timeout_secs = self.inner.config.stall_timeout.as_secs(),
            "Report made no terminal progress, failing it locally",
        );
        state.error = Some(ConnectionError::StallTimeout.to_string());
        self.set_report_status(&mut state, ReportStatus::Error);
        self.publish(&state);
    }

    // ---- private helpers ----

    /// Move the report status, arming or clearing the timers tied to it.
    fn set_report_status(&self, state: &mut ManagerState, next: ReportStatus) {
        if state.report_status == next {
            return;
        }
        state.report_status = next;

        if let Some(watchdog) = state.watchdog.take() {
            watchdog.cancel();
        }

        let Some(job_id) = state.job_id.clone() else {
            return;
        };

        if next.is_terminal() {
            tracing::info!(job_id = %job_id, report_status = %next, "Report reached a terminal state");
        }

        match next {
            ReportStatus::InProgress => {
                let this = self.clone();
                let job = job_id.clone();
                state.watchdog = Some(
                    state
                        .job_scope
                        .after(self.inner.config.stall_timeout, async move { this.on_stall(job) }),
                );
            }
            ReportStatus::Completed if state.connection_status == ConnectionStatus::Connected => {
                let this = self.clone();
                state.job_scope.after(
                    self.inner.config.completion_disconnect_delay,
                    async move {
                        if this.job_id().as_ref() == Some(&job_id) {
                            tracing::info!(job_id = %job_id, "Report complete, closing channel");
                            this.disconnect();
                        }
                    },
                );
            }
            _ => {}
        }
    }

    fn exhaust(&self, state: &mut ManagerState, job_id: &JobId) {
        let max_attempts = self.inner.config.reconnect.max_attempts;
        tracing::error!(job_id = %job_id, max_attempts, "Giving up on report channel");
        state.connection_status = ConnectionStatus::Error;
        state.error = Some(ConnectionError::RetriesExhausted(max_attempts).to_string());
        self.set_report_status(state, ReportStatus::Error);
    }

    fn publish(&self, state: &ManagerState) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.inner.snapshot_tx.send(snapshot_of(state));
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn snapshot_of(state: &ManagerState) -> SessionSnapshot {
    SessionSnapshot {
        job_id: state.job_id.clone(),
        connection_status: state.connection_status,
        report_status: state.report_status,
        error: state.error.clone(),
        chunking_complete: state.reassembler.is_complete(),
        artifact: state.reassembler.artifact(),
        last_envelope: state.last_envelope.clone(),
        reconnect_attempts: state.reconnect_attempts,
    }
}

/// Connection failures, surfaced as the snapshot's error message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The channel did not open within the establishment timeout.
    #[error("WebSocket connection timed out")]
    EstablishTimeout,

    /// The transport failed to open or broke while open.
    #[error("WebSocket connection error: {0}")]
    Transport(String),

    /// Every reconnect attempt was used up.
    #[error("Failed to reconnect after {0} attempts")]
    RetriesExhausted(u32),

    /// The job stayed in progress past the stall watchdog.
    #[error("Report generation timed out. Please try again.")]
    StallTimeout,
}
