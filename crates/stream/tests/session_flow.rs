//! End-to-end flows through `StreamSession`: a real connection manager
//! and coordinator over a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use quest_core::routes::Route;
use quest_core::status::{ConnectionStatus, ReportStatus};
use quest_store::{MemoryBackend, SessionOrigin};
use quest_stream::{CoordinatorConfig, NotificationLevel, StreamSession};
use serde_json::json;

use common::{
    advance, job, settle, test_config, OpenOutcome, RecordingNavigator, RecordingNotifier,
    RecordingReports, ScriptedTransport,
};

struct Harness {
    session: StreamSession,
    origin: Arc<SessionOrigin>,
    transport: Arc<ScriptedTransport>,
    reports: Arc<RecordingReports>,
    navigator: Arc<RecordingNavigator>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let origin = SessionOrigin::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let reports = RecordingReports::new();
    let navigator = RecordingNavigator::new();
    let notifier = RecordingNotifier::new();

    let session = StreamSession::start(
        test_config(),
        CoordinatorConfig::default(),
        transport.clone(),
        Arc::new(origin.open()),
        reports.clone(),
        navigator.clone(),
        notifier.clone(),
    );

    Harness {
        session,
        origin,
        transport,
        reports,
        navigator,
        notifier,
    }
}

#[tokio::test(start_paused = true)]
async fn completed_job_is_persisted_and_released() {
    let h = harness();
    let mut cleanups = h.session.coordinator().subscribe_cleanups();

    h.session.begin(job("job-1"));
    settle().await;
    assert_eq!(h.session.store().get(), Some(job("job-1")));

    let peer = h.transport.peer(0);
    peer.send_json(json!({"event": "connected", "report_id": "job-1", "message": "ok"}));
    peer.send_json(json!({"event": "storm_outline", "message": "Drafting outline"}));
    peer.send_json(json!({
        "event": "completion_chunks_started",
        "total_chunks": {"raw_content": 2, "processed_content": 2}
    }));
    peer.send_json(json!({"event": "completion_chunk", "chunk_type": "processed_content", "chunk_index": 1, "data": "world"}));
    peer.send_json(json!({"event": "completion_chunk", "chunk_type": "raw_content", "chunk_index": 0, "data": "hello "}));
    peer.send_json(json!({"event": "completion_chunk", "chunk_type": "references", "chunk_index": 0, "data": {"url_to_info": {}}}));
    peer.send_json(json!({"event": "completion_chunk", "chunk_type": "processed_content", "chunk_index": 0, "data": "hello "}));
    peer.send_json(json!({"event": "completion_chunk", "chunk_type": "raw_content", "chunk_index": 1, "data": "world"}));
    peer.send_json(json!({"event": "completion_chunks_finished"}));
    settle().await;

    assert_eq!(h.reports.update_count(), 1);
    let (id, update) = h.reports.updates.lock().unwrap()[0].clone();
    assert_eq!(id, job("job-1"));
    assert_eq!(update.raw_content, "hello world");
    assert_eq!(update.processed_content, "hello world");
    assert_eq!(update.references, json!({"url_to_info": {}}));

    let notes = h.notifier.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotificationLevel::Success);

    advance(Duration::from_millis(1600)).await;
    assert_eq!(h.navigator.routes(), vec![Route::Detail(job("job-1"))]);

    advance(Duration::from_secs(11)).await;
    assert_eq!(h.session.store().get(), None);
    assert_eq!(cleanups.try_recv().unwrap(), job("job-1"));
    assert!(!peer.is_live());
    assert_eq!(h.session.manager().status(), ConnectionStatus::Disconnected);
    assert_eq!(h.session.manager().pending_tasks(), 0);
    assert_eq!(h.transport.open_count(), 1);
    assert_eq!(h.reports.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_error_deletes_and_returns_to_listing() {
    let h = harness();

    h.session.begin(job("job-1"));
    settle().await;
    h.transport.peer(0).send_json(json!({
        "event": "error",
        "message": "API error during STORM processing: 500",
        "should_delete": true
    }));
    settle().await;

    assert_eq!(*h.reports.deletes.lock().unwrap(), vec![job("job-1")]);
    assert_eq!(h.navigator.routes(), vec![Route::Listing]);
    assert_eq!(h.session.store().get(), None);
    assert_eq!(h.session.manager().status(), ConnectionStatus::Disconnected);
    assert!(!h.transport.peer(0).is_live());

    let notes = h.notifier.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "API Error: Report generation failed");
    assert!(notes[0].persistent);

    advance(Duration::from_secs(30)).await;
    assert_eq!(h.reports.delete_count(), 1);
    assert_eq!(h.transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_channel_is_released_after_retries() {
    let h = harness();
    h.transport.script([
        OpenOutcome::Accept,
        OpenOutcome::Fail("refused".into()),
        OpenOutcome::Fail("refused".into()),
        OpenOutcome::Fail("refused".into()),
    ]);

    h.session.begin(job("job-1"));
    settle().await;
    h.transport.peer(0).close();
    settle().await;

    // Retries keep the job alive through the grace period.
    advance(Duration::from_secs(6)).await;
    assert_eq!(h.session.store().get(), Some(job("job-1")));

    advance(Duration::from_secs(14)).await;
    assert_eq!(h.transport.open_count(), 4);
    assert_eq!(h.session.store().get(), None);
    assert_eq!(h.reports.delete_count(), 0);

    let notes = h.notifier.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotificationLevel::Error);
    assert_eq!(
        notes[0].description.as_deref(),
        Some("Failed to reconnect after 3 attempts")
    );
    assert_eq!(h.session.manager().report_status(), ReportStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn resume_reconnects_to_stored_job() {
    let h = harness();
    // Another client started the job.
    h.origin.open().set(Some(job("job-7"))).unwrap();

    assert_eq!(h.session.resume(), Some(job("job-7")));
    settle().await;

    assert_eq!(
        h.transport.peer(0).url,
        "ws://localhost:8000/ws/reports/job-7"
    );
    assert_eq!(h.session.manager().status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn resume_without_stored_job_does_nothing() {
    let h = harness();

    assert_eq!(h.session.resume(), None);
    settle().await;

    assert_eq!(h.transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn beginning_another_job_replaces_the_channel() {
    let h = harness();

    h.session.begin(job("job-1"));
    settle().await;
    h.session.begin(job("job-2"));
    settle().await;

    assert!(!h.transport.peer(0).is_live());
    assert!(h.transport.peer(1).is_live());
    assert_eq!(h.transport.live_at_open(), vec![0, 0]);
    assert_eq!(h.session.store().get(), Some(job("job-2")));
    assert_eq!(h.session.manager().job_id(), Some(job("job-2")));
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_stored_job_for_later() {
    let h = harness();

    h.session.begin(job("job-1"));
    settle().await;
    let peer = h.transport.peer(0);
    let store = Arc::clone(h.session.store());

    h.session.shutdown();
    advance(Duration::from_secs(30)).await;

    assert!(!peer.is_live());
    assert_eq!(store.get(), Some(job("job-1")));
    assert!(h.notifier.all().is_empty());
    assert!(h.navigator.routes().is_empty());
    assert_eq!(h.transport.open_count(), 1);
}
