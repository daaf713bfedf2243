//! Resilient client for the per-job report stream.
//!
//! Layers, bottom up:
//!
//! * [`envelope`] decodes inbound frames into a closed enum.
//! * [`reassembler`] orders chunked output into the final artifact.
//! * [`transport`] opens channels; [`transport::WsTransport`] over WebSocket.
//! * [`connection`] keeps one channel per job alive with bounded retries.
//! * [`coordinator`] fires persist, delete, redirect and cleanup once.
//! * [`session`] pairs the two with a shared store view.

pub mod api;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod envelope;
pub mod reassembler;
pub mod reconnect;
pub mod session;
pub mod snapshot;
pub mod timers;
pub mod transport;

pub use api::{ReportApi, ReportApiError};
pub use collaborators::{
    Navigator, Notification, NotificationLevel, Notifier, ReportService, ReportUpdate,
    SessionControl,
};
pub use config::{ConfigError, CoordinatorConfig, StreamConfig};
pub use connection::{ConnectionError, ConnectionManager};
pub use coordinator::{Collaborators, CompletionCoordinator};
pub use envelope::{parse_envelope, Envelope, ProtocolError};
pub use reassembler::{ChunkReassembler, ReassembledArtifact};
pub use session::StreamSession;
pub use snapshot::SessionSnapshot;
pub use transport::{Channel, InboundFrame, Transport, TransportError, WsTransport};
