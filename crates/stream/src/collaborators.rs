//! Seams between the completion coordinator and the outside world.
//!
//! The coordinator never talks to HTTP, the UI or the channel directly;
//! it calls these traits. Production wiring uses
//! [`ReportApi`](crate::api::ReportApi) and [`ConnectionManager`];
//! tests substitute recording fakes.

use async_trait::async_trait;
use quest_core::routes::Route;
use quest_core::types::JobId;
use serde::Serialize;
use serde_json::Value;

use crate::api::ReportApiError;
use crate::connection::ConnectionManager;
use crate::reassembler::ReassembledArtifact;
use crate::snapshot::SessionSnapshot;

/// Status value written with a finished report.
pub const REPORT_STATUS_COMPLETED: &str = "completed";

/// Body of the persist-on-success call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportUpdate {
    pub raw_content: String,
    pub processed_content: String,
    pub references: Value,
    pub status: &'static str,
}

impl ReportUpdate {
    pub fn completed(artifact: &ReassembledArtifact) -> Self {
        Self {
            raw_content: artifact.raw_content.clone(),
            processed_content: artifact.processed_content.clone(),
            references: artifact.references.clone(),
            status: REPORT_STATUS_COMPLETED,
        }
    }
}

/// Persistence API for report records.
#[async_trait]
pub trait ReportService: Send + Sync {
    async fn update(&self, job_id: &JobId, update: &ReportUpdate) -> Result<(), ReportApiError>;

    async fn delete(&self, job_id: &JobId) -> Result<(), ReportApiError>;
}

/// Moves the user to another view.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: Option<String>,
    /// Stays until dismissed instead of timing out.
    pub persistent: bool,
}

impl Notification {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            title: title.into(),
            description: None,
            persistent: false,
        }
    }

    pub fn persistent_error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            description: Some(description.into()),
            persistent: true,
        }
    }
}

/// Shows notifications to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// The part of the connection manager the coordinator drives.
pub trait SessionControl: Send + Sync {
    fn disconnect(&self);

    fn snapshot(&self) -> SessionSnapshot;
}

impl SessionControl for ConnectionManager {
    fn disconnect(&self) {
        ConnectionManager::disconnect(self);
    }

    fn snapshot(&self) -> SessionSnapshot {
        ConnectionManager::snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_body_shape() {
        let artifact = ReassembledArtifact {
            raw_content: "raw".into(),
            processed_content: "processed".into(),
            references: json!({"url_to_info": {}}),
        };
        let body = serde_json::to_value(ReportUpdate::completed(&artifact)).unwrap();
        assert_eq!(
            body,
            json!({
                "raw_content": "raw",
                "processed_content": "processed",
                "references": {"url_to_info": {}},
                "status": "completed",
            })
        );
    }

    #[test]
    fn notification_constructors() {
        let ok = Notification::success("Done");
        assert_eq!(ok.level, NotificationLevel::Success);
        assert!(!ok.persistent);

        let err = Notification::persistent_error("Error: Report generation failed", "boom");
        assert_eq!(err.level, NotificationLevel::Error);
        assert_eq!(err.description.as_deref(), Some("boom"));
        assert!(err.persistent);
    }
}
