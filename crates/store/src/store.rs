//! The shared "active job" register.
//!
//! A [`SessionOrigin`] is the unit of sharing: one durable backend plus
//! one change bus. Every client (a browser tab, for example)
//! opens its own [`SharedSessionStore`] view on the origin. Writes go to
//! the view's in-memory copy, the bus, and the backend; other views pick
//! the write up the next time they are read.
//!
//! Views do not coordinate with each other. Concurrent writers resolve by
//! last-write-wins on the origin's write sequence, so a write from one
//! view can silently replace another view's idea of the active job. This
//! race is accepted. Within one origin, sequence assignment, the change
//! notification and the durable write happen under a single write lock,
//! so the backend always holds the value with the highest sequence.

use std::sync::{Arc, Mutex};

use quest_core::types::JobId;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

use crate::backend::{SessionBackend, SessionStoreError};
use crate::bus::{StorageBus, StorageEvent};

/// Backend key holding the active job id.
pub const ACTIVE_JOB_KEY: &str = "currentReportId";

/// Shared backend + bus that views are opened on.
pub struct SessionOrigin {
    backend: Box<dyn SessionBackend>,
    bus: StorageBus,
    /// Serializes `next_seq`, publish and the durable write.
    write_lock: Mutex<()>,
}

impl SessionOrigin {
    pub fn new(backend: impl SessionBackend + 'static) -> Arc<Self> {
        Arc::new(Self {
            backend: Box::new(backend),
            bus: StorageBus::default(),
            write_lock: Mutex::new(()),
        })
    }

    /// Open a new client view, hydrated from the durable backend.
    pub fn open(self: &Arc<Self>) -> SharedSessionStore {
        // Subscribe before hydrating so no write slips between the two.
        let changes = self.bus.subscribe();
        let value = self.hydrate();
        SharedSessionStore {
            origin: Arc::clone(self),
            view_id: Uuid::new_v4(),
            view: Mutex::new(View {
                value,
                seq: 0,
                changes,
            }),
        }
    }

    /// Read the durable value, treating unreadable or invalid data as
    /// "no active job".
    fn hydrate(&self) -> Option<JobId> {
        match self.backend.load(ACTIVE_JOB_KEY) {
            Ok(Some(raw)) => match JobId::parse(raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid stored job id");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to hydrate session store");
                None
            }
        }
    }
}

struct View {
    value: Option<JobId>,
    /// Write sequence of `value`; 0 means hydrated, never written.
    seq: u64,
    changes: broadcast::Receiver<StorageEvent>,
}

/// One client's view of the active job id.
pub struct SharedSessionStore {
    origin: Arc<SessionOrigin>,
    view_id: Uuid,
    view: Mutex<View>,
}

impl SharedSessionStore {
    /// Current active job id, after applying pending notifications from
    /// other views.
    pub fn get(&self) -> Option<JobId> {
        let mut view = self.lock();
        self.apply_pending(&mut view);
        view.value.clone()
    }

    /// Replace the active job id (`None` clears it).
    ///
    /// The in-memory value and the notification to other views are
    /// updated even when the durable write fails; the error is returned
    /// so the caller can log it.
    pub fn set(&self, value: Option<JobId>) -> Result<(), SessionStoreError> {
        let mut view = self.lock();
        self.apply_pending(&mut view);

        // Taken after the view lock; never the other way round.
        let _write = self
            .origin
            .write_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let seq = self.origin.bus.next_seq();
        view.value = value.clone();
        view.seq = seq;

        self.origin
            .bus
            .publish(ACTIVE_JOB_KEY, value.clone(), seq, self.view_id);

        tracing::debug!(
            job_id = ?value.as_ref().map(JobId::as_str),
            seq,
            "Active job updated",
        );

        self.origin
            .backend
            .store(ACTIVE_JOB_KEY, value.as_ref().map(JobId::as_str))
    }

    /// Re-read the durable backend, picking up writes made by clients
    /// outside this process.
    pub fn refresh(&self) -> Result<Option<JobId>, SessionStoreError> {
        let raw = self.origin.backend.load(ACTIVE_JOB_KEY)?;
        let value = raw.and_then(|r| JobId::parse(r).ok());
        let mut view = self.lock();
        self.apply_pending(&mut view);
        view.value = value.clone();
        Ok(value)
    }

    /// Subscribe to raw change notifications on the origin.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.origin.bus.subscribe()
    }

    /// Identifier of this view in published [`StorageEvent`]s.
    pub fn view_id(&self) -> Uuid {
        self.view_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply_pending(&self, view: &mut View) {
        loop {
            match view.changes.try_recv() {
                Ok(event) => {
                    if event.key != ACTIVE_JOB_KEY || event.source == self.view_id {
                        continue;
                    }
                    if event.seq > view.seq {
                        view.value = event.new_value;
                        view.seq = event.seq;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session store view lagged, re-hydrating");
                    view.value = self.origin.hydrate();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}
