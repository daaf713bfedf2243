//! Navigation targets the coordinator can send the user to.

use std::fmt;

use crate::types::JobId;

/// Listing view of every report.
pub const ROUTE_DASHBOARD: &str = "/dashboard";

/// Where to send the user once a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The finished report's detail view.
    Detail(JobId),
    /// The report listing.
    Listing,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Self::Detail(id) => format!("{ROUTE_DASHBOARD}/{id}"),
            Self::Listing => ROUTE_DASHBOARD.to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
