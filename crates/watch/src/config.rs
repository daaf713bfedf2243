//! Daemon settings read from the environment.

use std::path::PathBuf;

use quest_core::error::CoreError;
use quest_core::types::JobId;
use quest_stream::{ConfigError, StreamConfig};

const DEFAULT_APP_URL: &str = "http://localhost:3000";
const DEFAULT_STATE_DIR: &str = ".quest";

#[derive(Debug, thiserror::Error)]
pub enum WatchConfigError {
    #[error(transparent)]
    Stream(#[from] ConfigError),

    #[error("Invalid JOB_ID: {0}")]
    JobId(#[from] CoreError),
}

/// Everything the daemon needs to follow one job.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Base URL of the report API and of user-facing links.
    pub app_url: String,
    /// Directory holding the durable session state.
    pub state_dir: PathBuf,
    /// Job to start following; `None` resumes the stored one.
    pub job_id: Option<JobId>,
    pub stream: StreamConfig,
}

impl WatchConfig {
    /// Load from environment variables.
    ///
    /// | Env var           | Default                 |
    /// |-------------------|-------------------------|
    /// | `QUEST_APP_URL`   | `http://localhost:3000` |
    /// | `QUEST_STATE_DIR` | `.quest`                |
    /// | `JOB_ID`          | unset (resume)          |
    ///
    /// Stream settings come from [`StreamConfig::from_env`].
    pub fn from_env() -> Result<Self, WatchConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WatchConfigError> {
        let job_id = match lookup("JOB_ID").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(JobId::parse(raw.trim())?),
            None => None,
        };

        Ok(Self {
            app_url: lookup("QUEST_APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.into()),
            state_dir: lookup("QUEST_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            job_id,
            stream: StreamConfig::from_lookup(&lookup)?,
        })
    }
}
