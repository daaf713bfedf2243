//! Integration tests for the terminal collaborators and the durable state
//! the daemon resumes from.

use quest_core::routes::Route;
use quest_core::types::JobId;
use quest_store::{FileBackend, SessionOrigin};
use quest_stream::{Navigator, Notification, Notifier};
use quest_watch::console::{ConsoleNavigator, TracingNotifier};

fn job(id: &str) -> JobId {
    JobId::parse(id).unwrap()
}

// ---------------------------------------------------------------------------
// Test: navigation targets
// ---------------------------------------------------------------------------

#[test]
fn navigator_builds_absolute_urls() {
    let navigator = ConsoleNavigator::new("https://app.example.com/");

    assert_eq!(
        navigator.url_for(&Route::Detail(job("r-1"))),
        "https://app.example.com/dashboard/r-1"
    );
    assert_eq!(
        navigator.url_for(&Route::Listing),
        "https://app.example.com/dashboard"
    );
}

#[test]
fn navigator_remembers_last_route() {
    let navigator = ConsoleNavigator::new("http://localhost:3000");
    assert_eq!(navigator.last_route(), None);

    navigator.navigate(Route::Detail(job("r-1")));
    navigator.navigate(Route::Listing);

    assert_eq!(navigator.last_route(), Some(Route::Listing));
}

#[test]
fn notifier_accepts_every_level() {
    let notifier = TracingNotifier;
    notifier.notify(Notification::success("Report completed!"));
    notifier.notify(Notification::persistent_error(
        "Timeout Error: Report generation failed",
        "STORM processing timeout after 900 seconds",
    ));
}

// ---------------------------------------------------------------------------
// Test: resume across restarts
// ---------------------------------------------------------------------------

/// A job stored by one run is visible to the next run on the same state
/// directory.
#[test]
fn stored_job_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let origin = SessionOrigin::new(FileBackend::open(dir.path()).unwrap());
        origin.open().set(Some(job("r-9"))).unwrap();
    }

    let origin = SessionOrigin::new(FileBackend::open(dir.path()).unwrap());
    assert_eq!(origin.open().get(), Some(job("r-9")));
}

#[test]
fn cleared_job_is_not_resumed() {
    let dir = tempfile::tempdir().unwrap();

    {
        let origin = SessionOrigin::new(FileBackend::open(dir.path()).unwrap());
        let store = origin.open();
        store.set(Some(job("r-9"))).unwrap();
        store.set(None).unwrap();
    }

    let origin = SessionOrigin::new(FileBackend::open(dir.path()).unwrap());
    assert_eq!(origin.open().get(), None);
}
