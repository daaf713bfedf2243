//! Wire-level names used on the per-job report channel.
//!
//! The backend pushes envelopes keyed by an `event` field; the client
//! sends keepalive frames keyed by a `type` field.

/// Server acknowledged the subscription.
pub const EVENT_CONNECTED: &str = "connected";

/// Chunked completion is starting; carries per-channel chunk totals.
pub const EVENT_CHUNKS_STARTED: &str = "completion_chunks_started";

/// One indexed slice of a content channel, or the references blob.
pub const EVENT_CHUNK: &str = "completion_chunk";

/// Every chunk has been sent.
pub const EVENT_CHUNKS_FINISHED: &str = "completion_chunks_finished";

/// Legacy single-frame completion (content delivered elsewhere).
pub const EVENT_COMPLETED: &str = "completed";

/// The job failed server-side.
pub const EVENT_ERROR: &str = "error";

/// Outbound keepalive frame type.
pub const MSG_TYPE_PING: &str = "ping";

/// Server reply to a keepalive frame.
pub const MSG_TYPE_PONG: &str = "pong";

/// Chunk channel carrying the unprocessed markdown.
pub const CHUNK_RAW_CONTENT: &str = "raw_content";

/// Chunk channel carrying the citation-linked markdown.
pub const CHUNK_PROCESSED_CONTENT: &str = "processed_content";

/// Non-indexed channel carrying the references blob.
pub const CHUNK_REFERENCES: &str = "references";
