//! Ordered reassembly of the chunked final artifact.
//!
//! The server announces per-channel chunk totals, then sends indexed
//! slices in any order, then signals that it is finished. The
//! [`ChunkReassembler`] writes each slice into a pre-sized
//! [`ChunkBuffer`] and only exposes the concatenated
//! [`ReassembledArtifact`] once the finished signal has arrived.

use std::sync::Arc;

use quest_core::status::ReportStatus;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::{
    ChunkPayload, ChunkTotals, ContentChannel, Envelope, MAX_CHUNKS_PER_CHANNEL,
};

/// Ordered slots for one content channel.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    slots: Vec<String>,
}

impl ChunkBuffer {
    /// Replace the buffer with `len` empty slots.
    pub fn allocate(&mut self, len: usize) {
        self.slots = vec![String::new(); len];
    }

    /// Write a slice at `index`, replacing anything already there.
    ///
    /// Returns `false` when the index is outside the announced size.
    pub fn write(&mut self, index: usize, data: String) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = data;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Concatenate every slot in index order.
    pub fn concat(&self) -> String {
        self.slots.concat()
    }
}

/// The final report, assembled from every channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassembledArtifact {
    pub raw_content: String,
    pub processed_content: String,
    pub references: Value,
}

/// Accumulates chunk envelopes for the current connection.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    raw: ChunkBuffer,
    processed: ChunkBuffer,
    references: Value,
    /// Buffers have been sized by a start announcement.
    allocated: bool,
    complete: bool,
    artifact: Option<Arc<ReassembledArtifact>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one envelope into the buffers.
    ///
    /// Returns the report status the envelope implies, or `None` when it
    /// leaves the report status alone.
    pub fn apply(&mut self, envelope: &Envelope) -> Option<ReportStatus> {
        match envelope {
            Envelope::ChunksStarted { totals: Some(totals) }
                if totals.raw_content > MAX_CHUNKS_PER_CHANNEL
                    || totals.processed_content > MAX_CHUNKS_PER_CHANNEL =>
            {
                tracing::warn!(
                    raw_content = totals.raw_content,
                    processed_content = totals.processed_content,
                    limit = MAX_CHUNKS_PER_CHANNEL,
                    "Chunk start announced too many chunks, ignoring",
                );
                None
            }
            Envelope::ChunksStarted { totals: Some(totals) } => {
                self.start(*totals);
                None
            }
            Envelope::ChunksStarted { totals: None } => {
                tracing::warn!("Chunk start announced without per-channel totals, ignoring");
                None
            }
            Envelope::Chunk(payload) => {
                self.write(payload);
                None
            }
            Envelope::ChunksFinished => {
                self.complete = true;
                self.rebuild_artifact();
                tracing::info!(
                    raw_chunks = self.raw.len(),
                    processed_chunks = self.processed.len(),
                    "Chunked completion finished",
                );
                Some(ReportStatus::Completed)
            }
            Envelope::Completed { .. } => Some(ReportStatus::Completed),
            Envelope::Error { .. } => Some(ReportStatus::Error),
            Envelope::Progress { .. } => Some(ReportStatus::InProgress),
            Envelope::Connected { .. } | Envelope::Pong { .. } => None,
        }
    }

    /// `true` once `completion_chunks_finished` has been received.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The assembled artifact, available only after the finished signal.
    pub fn artifact(&self) -> Option<Arc<ReassembledArtifact>> {
        self.artifact.clone()
    }

    pub fn buffer(&self, channel: ContentChannel) -> &ChunkBuffer {
        match channel {
            ContentChannel::RawContent => &self.raw,
            ContentChannel::ProcessedContent => &self.processed,
        }
    }

    /// Discard every buffer; called when a new connection begins.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ---- private helpers ----

    fn start(&mut self, totals: ChunkTotals) {
        tracing::debug!(
            raw_content = totals.raw_content,
            processed_content = totals.processed_content,
            "Allocating chunk buffers",
        );
        self.raw.allocate(totals.raw_content);
        self.processed.allocate(totals.processed_content);
        self.references = Value::Null;
        self.allocated = true;
        self.complete = false;
        self.artifact = None;
    }

    fn write(&mut self, payload: &ChunkPayload) {
        match payload {
            ChunkPayload::References(blob) => {
                self.references = blob.clone();
            }
            ChunkPayload::Content {
                channel,
                index,
                data,
            } => {
                if !self.allocated {
                    tracing::warn!(
                        chunk_type = channel.as_str(),
                        index,
                        "Chunk received before its size was announced, dropping",
                    );
                    return;
                }
                let buffer = match channel {
                    ContentChannel::RawContent => &mut self.raw,
                    ContentChannel::ProcessedContent => &mut self.processed,
                };
                if !buffer.write(*index, data.clone()) {
                    tracing::warn!(
                        chunk_type = channel.as_str(),
                        index,
                        len = buffer.len(),
                        "Chunk index out of range, dropping",
                    );
                    return;
                }
            }
        }
        if self.complete {
            self.rebuild_artifact();
        }
    }

    fn rebuild_artifact(&mut self) {
        self.artifact = Some(Arc::new(ReassembledArtifact {
            raw_content: self.raw.concat(),
            processed_content: self.processed.concat(),
            references: self.references.clone(),
        }));
    }
}
