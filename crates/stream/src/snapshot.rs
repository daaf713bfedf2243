//! Session state published by the connection manager.
//!
//! A [`SessionSnapshot`] is broadcast after every state change. The
//! completion coordinator, and any other observer, reacts to snapshots
//! instead of reaching into the manager.

use std::sync::Arc;

use quest_core::status::{ConnectionStatus, ReportStatus};
use quest_core::types::JobId;

use crate::envelope::Envelope;
use crate::reassembler::ReassembledArtifact;

/// Point-in-time view of the active job session.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Job the manager is following, `None` once disconnected.
    pub job_id: Option<JobId>,
    pub connection_status: ConnectionStatus,
    pub report_status: ReportStatus,
    /// Last error message, cleared when a channel opens.
    pub error: Option<String>,
    /// `completion_chunks_finished` has been received.
    pub chunking_complete: bool,
    /// Assembled report, present once chunking is complete.
    pub artifact: Option<Arc<ReassembledArtifact>>,
    /// Most recent decoded envelope.
    pub last_envelope: Option<Arc<Envelope>>,
    /// Consecutive reconnect attempts for the current job.
    pub reconnect_attempts: u32,
}

impl SessionSnapshot {
    /// Message of the latest envelope when it is an error asking for the
    /// report to be deleted.
    pub fn deletion_request(&self) -> Option<&str> {
        match self.last_envelope.as_deref() {
            Some(Envelope::Error {
                message,
                should_delete: true,
            }) => Some(message),
            _ => None,
        }
    }
}
