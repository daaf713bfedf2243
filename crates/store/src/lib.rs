//! Durable, cross-client register of the active report job.
//!
//! - [`SharedSessionStore`]: one client's view (`get` / `set`).
//! - [`SessionOrigin`]: the backend + change bus the views share.
//! - [`FileBackend`] / [`MemoryBackend`]: durable and volatile storage.
//! - [`StorageBus`]: change notifications between views.

pub mod backend;
pub mod bus;
pub mod store;

pub use backend::{FileBackend, MemoryBackend, SessionBackend, SessionStoreError};
pub use bus::{StorageBus, StorageEvent};
pub use store::{SessionOrigin, SharedSessionStore, ACTIVE_JOB_KEY};
