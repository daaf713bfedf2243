//! Shared domain types for the QUEST report stream client.
//!
//! Everything here is transport-agnostic: job identifiers, the two
//! status machines, wire-level event names, navigation routes, and the
//! display taxonomy for server-reported failures.

pub mod error;
pub mod error_category;
pub mod job_events;
pub mod routes;
pub mod status;
pub mod types;
