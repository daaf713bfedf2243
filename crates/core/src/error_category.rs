//! Coarse display taxonomy for server-reported job failures.
//!
//! Classification only changes the notification title; the raw message
//! is always shown alongside it.

use std::fmt;

/// Category shown to the user when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Api,
    Timeout,
    OpenAiApi,
    Generic,
}

impl ErrorCategory {
    /// Classify a server error message by substring match.
    ///
    /// Checks run in a fixed order; the first match wins.
    pub fn classify(message: &str) -> Self {
        if message.contains("API error during STORM processing") {
            Self::Api
        } else if message.contains("timeout") {
            Self::Timeout
        } else if message.contains("OpenAI API error") {
            Self::OpenAiApi
        } else {
            Self::Generic
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Api => "API Error",
            Self::Timeout => "Timeout Error",
            Self::OpenAiApi => "OpenAI API Error",
            Self::Generic => "Error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
