//! Shared helpers for quest-stream integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quest_core::routes::Route;
use quest_core::types::JobId;
use quest_store::{MemoryBackend, SessionOrigin, SharedSessionStore};
use quest_stream::api::ReportApiError;
use quest_stream::{
    Channel, InboundFrame, Navigator, Notification, Notifier, ReportService, ReportUpdate,
    SessionControl, SessionSnapshot, StreamConfig, Transport, TransportError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn job(id: &str) -> JobId {
    JobId::parse(id).unwrap()
}

/// Let every ready task run without moving the paused clock noticeably.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

pub fn memory_store() -> Arc<SharedSessionStore> {
    Arc::new(SessionOrigin::new(MemoryBackend::new()).open())
}

pub fn test_config() -> StreamConfig {
    StreamConfig::default()
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Accept,
    Fail(String),
    /// Never completes; exercises the establishment timeout.
    Hang,
}

/// Server side of one accepted channel.
pub struct Peer {
    pub url: String,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
}

impl Peer {
    pub fn send_json(&self, value: Value) {
        let _ = self.inbound.send(InboundFrame::Text(value.to_string()));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.inbound.send(InboundFrame::Text(text.to_string()));
    }

    /// Close from the server side.
    pub fn close(&self) {
        let _ = self.inbound.send(InboundFrame::Closed(None));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.inbound.send(InboundFrame::Error(message.to_string()));
    }

    /// `false` once the client dropped its end.
    pub fn is_live(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Frames the client has sent so far.
    pub fn sent(&self) -> Vec<String> {
        let mut rx = self.outbound.lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<OpenOutcome>>,
    peers: Mutex<Vec<Arc<Peer>>>,
    opens: AtomicUsize,
    /// Live channels observed at the moment of each open.
    live_at_open: Mutex<Vec<usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for upcoming opens; once exhausted, opens succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn peer(&self, index: usize) -> Arc<Peer> {
        Arc::clone(&self.peers.lock().unwrap()[index])
    }

    pub fn last_peer(&self) -> Arc<Peer> {
        let peers = self.peers.lock().unwrap();
        Arc::clone(peers.last().expect("no channel accepted yet"))
    }

    pub fn live_channels(&self) -> usize {
        self.peers.lock().unwrap().iter().filter(|p| p.is_live()).count()
    }

    pub fn live_at_open(&self) -> Vec<usize> {
        self.live_at_open.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &str) -> Result<Channel, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live_at_open.lock().unwrap().push(self.live_channels());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenOutcome::Accept);

        match outcome {
            OpenOutcome::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let closed = CancellationToken::new();
                self.peers.lock().unwrap().push(Arc::new(Peer {
                    url: url.to_string(),
                    inbound: in_tx,
                    outbound: Mutex::new(out_rx),
                    closed: closed.clone(),
                }));
                Ok(Channel::new(out_tx, in_rx, closed))
            }
            OpenOutcome::Fail(message) => Err(TransportError::Other(message)),
            OpenOutcome::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingReports {
    pub updates: Mutex<Vec<(JobId, ReportUpdate)>>,
    pub deletes: Mutex<Vec<JobId>>,
    pub fail: bool,
}

impl RecordingReports {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    fn outcome(&self) -> Result<(), ReportApiError> {
        if self.fail {
            Err(ReportApiError::ApiError {
                status: 500,
                body: "internal error".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReportService for RecordingReports {
    async fn update(&self, job_id: &JobId, update: &ReportUpdate) -> Result<(), ReportApiError> {
        self.updates
            .lock()
            .unwrap()
            .push((job_id.clone(), update.clone()));
        self.outcome()
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), ReportApiError> {
        self.deletes.lock().unwrap().push(job_id.clone());
        self.outcome()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().unwrap().push(route);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Stand-in for the connection manager in coordinator tests.
#[derive(Default)]
pub struct RecordingSession {
    pub disconnects: AtomicUsize,
    pub current: Mutex<SessionSnapshot>,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SessionControl for RecordingSession {
    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.current.lock().unwrap().clone()
    }
}
