//! `quest-watch` -- follow one report job until it is released.
//!
//! Connects to the report server's per-job channel, reassembles the
//! finished report, persists it through the app API and exits once the
//! job has been cleaned up. Interrupting the daemon keeps the job id in
//! the state directory so the next run resumes it.
//!
//! # Environment variables
//!
//! | Variable                     | Required | Default                 | Description                         |
//! |------------------------------|----------|-------------------------|-------------------------------------|
//! | `JOB_ID`                     | no       | stored job              | Job to start following              |
//! | `QUEST_APP_URL`              | no       | `http://localhost:3000` | Report API base URL                 |
//! | `QUEST_STREAM_URL`           | no       | `http://localhost:8000` | Report server base URL              |
//! | `QUEST_STATE_DIR`            | no       | `.quest`                | Durable session state directory     |
//! | `QUEST_CONNECT_TIMEOUT_SECS` | no       | `10`                    | Channel establishment timeout       |
//! | `QUEST_HEARTBEAT_SECS`       | no       | `30`                    | Ping interval                       |
//! | `QUEST_RECONNECT_DELAY_SECS` | no       | `3`                     | Delay before each reconnect         |
//! | `QUEST_MAX_RECONNECTS`       | no       | `3`                     | Reconnect attempts before giving up |
//! | `QUEST_STALL_TIMEOUT_SECS`   | no       | `600`                   | Stall watchdog                      |

use std::sync::Arc;

use anyhow::Context;
use quest_core::types::JobId;
use quest_store::{FileBackend, SessionOrigin};
use quest_stream::{CoordinatorConfig, ReportApi, StreamSession, WsTransport};
use quest_watch::config::WatchConfig;
use quest_watch::console::{ConsoleNavigator, TracingNotifier};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quest_watch=info,quest_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::from_env()?;

    tracing::info!(
        app_url = %config.app_url,
        ws_base = %config.stream.ws_base,
        state_dir = %config.state_dir.display(),
        "Starting quest-watch",
    );

    let backend = FileBackend::open(&config.state_dir)
        .with_context(|| format!("opening state dir {}", config.state_dir.display()))?;
    let store = Arc::new(SessionOrigin::new(backend).open());
    let navigator = Arc::new(ConsoleNavigator::new(&config.app_url));

    let session = StreamSession::start(
        config.stream.clone(),
        CoordinatorConfig::default(),
        Arc::new(WsTransport),
        store,
        Arc::new(ReportApi::new(&config.app_url)),
        navigator.clone(),
        Arc::new(TracingNotifier),
    );
    let mut cleanups = session.coordinator().subscribe_cleanups();

    let job_id = match config.job_id {
        Some(job_id) => {
            session.begin(job_id.clone());
            job_id
        }
        None => match session.resume() {
            Some(job_id) => job_id,
            None => {
                session.shutdown();
                anyhow::bail!("JOB_ID is not set and there is no stored job to resume");
            }
        },
    };

    tokio::select! {
        () = wait_for_release(&mut cleanups, &job_id) => {
            let destination = navigator.last_route().map(|route| navigator.url_for(&route));
            tracing::info!(job_id = %job_id, destination = ?destination, "Job released");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!(job_id = %job_id, "Interrupted, job kept for resume");
        }
    }

    session.shutdown();
    Ok(())
}

/// Resolves once the coordinator has released `job_id`.
async fn wait_for_release(cleanups: &mut broadcast::Receiver<JobId>, job_id: &JobId) {
    loop {
        match cleanups.recv().await {
            Ok(released) if released == *job_id => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed cleanup notifications");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
