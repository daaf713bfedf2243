//! Terminal stand-ins for the UI collaborators.
//!
//! A daemon has no toasts or views: notifications go to the log and
//! navigation records the target and logs its full URL.

use std::sync::Mutex;

use quest_core::routes::Route;
use quest_stream::{Navigator, Notification, NotificationLevel, Notifier};

/// Writes notifications as log lines.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let description = notification.description.as_deref().unwrap_or("");
        match notification.level {
            NotificationLevel::Success => {
                tracing::info!(title = %notification.title, description, "Notification");
            }
            NotificationLevel::Error => {
                tracing::error!(
                    title = %notification.title,
                    description,
                    persistent = notification.persistent,
                    "Notification",
                );
            }
        }
    }
}

/// Remembers where the user would have been sent.
#[derive(Debug)]
pub struct ConsoleNavigator {
    app_url: String,
    last: Mutex<Option<Route>>,
}

impl ConsoleNavigator {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into().trim_end_matches('/').to_string(),
            last: Mutex::new(None),
        }
    }

    /// Absolute URL of a route in the web app.
    pub fn url_for(&self, route: &Route) -> String {
        format!("{}{}", self.app_url, route.path())
    }

    pub fn last_route(&self) -> Option<Route> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: Route) {
        tracing::info!(url = %self.url_for(&route), "Navigate");
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(route);
    }
}
