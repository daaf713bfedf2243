//! The two status machines tracked per job session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the live channel for the active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Progress of the generation job as observed by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Error,
}

impl ReportStatus {
    /// `Completed` and `Error` end the job; nothing moves it out again
    /// except a fresh connect.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_initial_states() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
        assert_eq!(ReportStatus::default(), ReportStatus::NotStarted);
    }

    #[test]
    fn terminal_report_states() {
        assert!(!ReportStatus::NotStarted.is_terminal());
        assert!(!ReportStatus::InProgress.is_terminal());
        assert!(ReportStatus::Completed.is_terminal());
        assert!(ReportStatus::Error.is_terminal());
    }

    #[test]
    fn display_matches_serde_names() {
        let json = serde_json::to_string(&ReportStatus::InProgress).unwrap();
        assert_eq!(json, format!("\"{}\"", ReportStatus::InProgress));
        let json = serde_json::to_string(&ConnectionStatus::Connecting).unwrap();
        assert_eq!(json, format!("\"{}\"", ConnectionStatus::Connecting));
    }
}
