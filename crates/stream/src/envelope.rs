//! Report channel envelope types and parser.
//!
//! The report server sends JSON objects keyed by an `"event"` field, with
//! the remaining fields depending on the event. Decoding happens in two
//! stages: serde reads a permissive [`RawEnvelope`], then
//! [`parse_envelope`] maps it onto the closed [`Envelope`] enum. Frames
//! that cannot be mapped produce a [`ProtocolError`]; callers log them and
//! keep the session going.

use quest_core::job_events::{
    CHUNK_PROCESSED_CONTENT, CHUNK_RAW_CONTENT, CHUNK_REFERENCES, EVENT_CHUNK,
    EVENT_CHUNKS_FINISHED, EVENT_CHUNKS_STARTED, EVENT_COMPLETED, EVENT_CONNECTED, EVENT_ERROR,
    MSG_TYPE_PING, MSG_TYPE_PONG,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest per-channel chunk count a start announcement may carry.
pub const MAX_CHUNKS_PER_CHANNEL: usize = 100_000;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The server accepted the subscription.
    Connected {
        report_id: Option<String>,
        message: String,
    },

    /// Chunked delivery of the final artifact is about to begin.
    ///
    /// `totals` is `None` when the server announced a single scalar count,
    /// which does not size the per-channel buffers.
    ChunksStarted { totals: Option<ChunkTotals> },

    /// One slice of the final artifact.
    Chunk(ChunkPayload),

    /// Every chunk has been sent.
    ChunksFinished,

    /// Non-chunked completion used by older servers.
    Completed { data: Option<Value> },

    /// The job failed on the server.
    Error {
        message: String,
        should_delete: bool,
    },

    /// Any other event: a progress heartbeat from the job.
    Progress { event: String, message: String },

    /// Reply to our keepalive ping.
    Pong { timestamp: Option<i64> },
}

/// Per-channel chunk counts announced by `completion_chunks_started`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTotals {
    #[serde(default)]
    pub raw_content: usize,
    #[serde(default)]
    pub processed_content: usize,
}

/// Chunked text channel of the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentChannel {
    RawContent,
    ProcessedContent,
}

impl ContentChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawContent => CHUNK_RAW_CONTENT,
            Self::ProcessedContent => CHUNK_PROCESSED_CONTENT,
        }
    }
}

/// Body of a `completion_chunk` envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    /// Text slice for one content channel at `index`.
    Content {
        channel: ContentChannel,
        index: usize,
        data: String,
    },
    /// The whole references blob; it is never split.
    References(Value),
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// `total_chunks` is a per-channel object on current servers and a bare
/// number on older ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TotalChunks {
    PerChannel(ChunkTotals),
    Single(u64),
}

/// Every field any event may carry, all optional.
#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    event: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    report_id: Option<String>,
    message: Option<String>,
    data: Option<Value>,
    chunk_type: Option<String>,
    chunk_index: Option<u64>,
    total_chunks: Option<TotalChunks>,
    should_delete: Option<bool>,
    timestamp: Option<i64>,
}

/// Parse a report channel text frame into a typed envelope.
///
/// Returns `Err` for malformed JSON, frames without an event name, and
/// chunk frames that cannot be placed. Unknown event names are not
/// errors: they decode as [`Envelope::Progress`].
pub fn parse_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;

    let Some(event) = raw.event else {
        return match raw.kind.as_deref() {
            Some(MSG_TYPE_PONG) => Ok(Envelope::Pong {
                timestamp: raw.timestamp,
            }),
            _ => Err(ProtocolError::MissingEvent),
        };
    };

    let envelope = match event.as_str() {
        EVENT_CONNECTED => Envelope::Connected {
            report_id: raw.report_id,
            message: raw.message.unwrap_or_default(),
        },
        EVENT_CHUNKS_STARTED => Envelope::ChunksStarted {
            totals: chunk_totals(raw.total_chunks)?,
        },
        EVENT_CHUNK => Envelope::Chunk(chunk_payload(
            raw.chunk_type.as_deref(),
            raw.chunk_index,
            raw.data,
        )?),
        EVENT_CHUNKS_FINISHED => Envelope::ChunksFinished,
        EVENT_COMPLETED => Envelope::Completed { data: raw.data },
        EVENT_ERROR => Envelope::Error {
            message: raw.message.unwrap_or_default(),
            should_delete: raw.should_delete.unwrap_or(false),
        },
        _ => Envelope::Progress {
            event,
            message: raw.message.unwrap_or_default(),
        },
    };
    Ok(envelope)
}

fn chunk_totals(total: Option<TotalChunks>) -> Result<Option<ChunkTotals>, ProtocolError> {
    match total {
        Some(TotalChunks::PerChannel(totals)) => {
            for (channel, count) in [
                (CHUNK_RAW_CONTENT, totals.raw_content),
                (CHUNK_PROCESSED_CONTENT, totals.processed_content),
            ] {
                if count > MAX_CHUNKS_PER_CHANNEL {
                    return Err(ProtocolError::TooManyChunks { channel, count });
                }
            }
            Ok(Some(totals))
        }
        Some(TotalChunks::Single(count)) => {
            tracing::debug!(total_chunks = count, "Scalar chunk total carries no per-channel sizes");
            Ok(None)
        }
        None => Ok(None),
    }
}

fn chunk_payload(
    chunk_type: Option<&str>,
    chunk_index: Option<u64>,
    data: Option<Value>,
) -> Result<ChunkPayload, ProtocolError> {
    let (Some(chunk_type), Some(index)) = (chunk_type, chunk_index) else {
        return Err(ProtocolError::IncompleteChunk);
    };

    let channel = match chunk_type {
        CHUNK_RAW_CONTENT => ContentChannel::RawContent,
        CHUNK_PROCESSED_CONTENT => ContentChannel::ProcessedContent,
        CHUNK_REFERENCES => return Ok(ChunkPayload::References(data.unwrap_or(Value::Null))),
        other => return Err(ProtocolError::UnknownChunkType(other.to_string())),
    };

    let data = match data {
        Some(Value::String(s)) => s,
        None | Some(Value::Null) => String::new(),
        Some(_) => return Err(ProtocolError::InvalidChunkData(channel.as_str())),
    };

    Ok(ChunkPayload::Content {
        channel,
        index: index as usize,
        data,
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Keepalive frame sent while the channel is open.
#[derive(Debug, Clone)]
pub struct Ping {
    kind: &'static str,
    /// Unix time in milliseconds.
    pub timestamp: i64,
}

impl Ping {
    pub fn now() -> Self {
        Self {
            kind: MSG_TYPE_PING,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({ "type": self.kind, "timestamp": self.timestamp }).to_string()
    }
}

/// A frame that could not be turned into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope has no event name")]
    MissingEvent,

    #[error("Chunk envelope without chunk_type or chunk_index")]
    IncompleteChunk,

    #[error("Unknown chunk type '{0}'")]
    UnknownChunkType(String),

    #[error("Chunk data for {0} is not a string")]
    InvalidChunkData(&'static str),

    #[error("Announced {count} chunks for {channel}, limit is {MAX_CHUNKS_PER_CHANNEL}")]
    TooManyChunks { channel: &'static str, count: usize },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_connected() {
        let json = r#"{"event":"connected","report_id":"job-1","message":"Connected to report updates"}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(
            env,
            Envelope::Connected {
                report_id: Some("job-1".into()),
                message: "Connected to report updates".into(),
            }
        );
    }

    #[test]
    fn parse_chunks_started_per_channel() {
        let json = r#"{"event":"completion_chunks_started","report_id":"job-1","message":"Sending report",
            "total_chunks":{"raw_content":3,"processed_content":2}}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(
            env,
            Envelope::ChunksStarted {
                totals: Some(ChunkTotals {
                    raw_content: 3,
                    processed_content: 2,
                }),
            }
        );
    }

    #[test]
    fn parse_chunks_started_scalar_total_has_no_sizes() {
        let json = r#"{"event":"completion_chunks_started","total_chunks":5}"#;
        assert_eq!(
            parse_envelope(json).unwrap(),
            Envelope::ChunksStarted { totals: None }
        );
    }

    #[test]
    fn parse_chunks_started_over_limit_is_error() {
        let json = r#"{"event":"completion_chunks_started",
            "total_chunks":{"raw_content":1000000000000000000,"processed_content":2}}"#;
        assert_matches!(
            parse_envelope(json),
            Err(ProtocolError::TooManyChunks { channel: "raw_content", .. })
        );

        let json = format!(
            r#"{{"event":"completion_chunks_started","total_chunks":{{"raw_content":1,"processed_content":{}}}}}"#,
            MAX_CHUNKS_PER_CHANNEL + 1
        );
        assert_matches!(
            parse_envelope(&json),
            Err(ProtocolError::TooManyChunks { channel: "processed_content", .. })
        );
    }

    #[test]
    fn parse_chunks_started_at_limit_is_accepted() {
        let json = format!(
            r#"{{"event":"completion_chunks_started","total_chunks":{{"raw_content":{MAX_CHUNKS_PER_CHANNEL},"processed_content":0}}}}"#
        );
        assert_matches!(
            parse_envelope(&json),
            Ok(Envelope::ChunksStarted { totals: Some(ChunkTotals { raw_content: MAX_CHUNKS_PER_CHANNEL, .. }) })
        );
    }

    #[test]
    fn parse_content_chunk() {
        let json = r##"{"event":"completion_chunk","chunk_type":"raw_content","chunk_index":2,"data":"# Title"}"##;
        let env = parse_envelope(json).unwrap();
        assert_eq!(
            env,
            Envelope::Chunk(ChunkPayload::Content {
                channel: ContentChannel::RawContent,
                index: 2,
                data: "# Title".into(),
            })
        );
    }

    #[test]
    fn parse_references_chunk_keeps_blob() {
        let json = r#"{"event":"completion_chunk","chunk_type":"references","chunk_index":0,"data":{"url_to_info":{}}}"#;
        let env = parse_envelope(json).unwrap();
        assert_matches!(env, Envelope::Chunk(ChunkPayload::References(v)) if v.is_object());
    }

    #[test]
    fn parse_chunk_without_index_is_error() {
        let json = r#"{"event":"completion_chunk","chunk_type":"raw_content","data":"x"}"#;
        assert_matches!(parse_envelope(json), Err(ProtocolError::IncompleteChunk));
    }

    #[test]
    fn parse_chunk_unknown_type_is_error() {
        let json = r#"{"event":"completion_chunk","chunk_type":"summary","chunk_index":0,"data":"x"}"#;
        assert_matches!(
            parse_envelope(json),
            Err(ProtocolError::UnknownChunkType(t)) if t == "summary"
        );
    }

    #[test]
    fn parse_chunk_non_string_content_is_error() {
        let json = r#"{"event":"completion_chunk","chunk_type":"processed_content","chunk_index":0,"data":42}"#;
        assert_matches!(
            parse_envelope(json),
            Err(ProtocolError::InvalidChunkData("processed_content"))
        );
    }

    #[test]
    fn parse_error_with_should_delete() {
        let json = r#"{"event":"error","message":"OpenAI API error: quota","should_delete":true}"#;
        assert_eq!(
            parse_envelope(json).unwrap(),
            Envelope::Error {
                message: "OpenAI API error: quota".into(),
                should_delete: true,
            }
        );
    }

    #[test]
    fn parse_error_defaults_should_delete_to_false() {
        let json = r#"{"event":"error","message":"boom"}"#;
        assert_matches!(
            parse_envelope(json).unwrap(),
            Envelope::Error { should_delete: false, .. }
        );
    }

    #[test]
    fn parse_unknown_event_is_progress() {
        let json = r#"{"event":"research_phase","message":"Searching sources"}"#;
        assert_eq!(
            parse_envelope(json).unwrap(),
            Envelope::Progress {
                event: "research_phase".into(),
                message: "Searching sources".into(),
            }
        );
    }

    #[test]
    fn parse_pong() {
        let json = r#"{"type":"pong","timestamp":1700000000000}"#;
        assert_eq!(
            parse_envelope(json).unwrap(),
            Envelope::Pong {
                timestamp: Some(1_700_000_000_000),
            }
        );
    }

    #[test]
    fn parse_frame_without_event_is_error() {
        assert_matches!(
            parse_envelope(r#"{"message":"hi"}"#),
            Err(ProtocolError::MissingEvent)
        );
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert_matches!(parse_envelope("not json at all"), Err(ProtocolError::Json(_)));
    }

    #[test]
    fn ping_serialises_type_and_timestamp() {
        let ping = Ping::now();
        let value: Value = serde_json::from_str(&ping.to_json()).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["timestamp"], ping.timestamp);
    }
}
