//! REST client for the report persistence endpoints.
//!
//! Wraps `PUT /api/reports/{id}` and `DELETE /api/reports/{id}` using
//! [`reqwest`], and implements [`ReportService`] so the completion
//! coordinator can call it.

use async_trait::async_trait;
use quest_core::types::JobId;
use serde::Deserialize;

use crate::collaborators::{ReportService, ReportUpdate};

/// HTTP client for the application's report API.
pub struct ReportApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body returned by the report endpoints.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Errors from the report REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ReportApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("Report API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body reported `success: false`.
    #[error("Report API rejected the request: {0}")]
    Rejected(String),
}

impl ReportApi {
    /// Create a client for the application at `api_url`,
    /// e.g. `http://localhost:3000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn report_url(&self, job_id: &JobId) -> String {
        format!("{}/api/reports/{}", self.api_url, job_id)
    }

    /// Store the finished report content and mark it completed.
    pub async fn update_report(
        &self,
        job_id: &JobId,
        update: &ReportUpdate,
    ) -> Result<(), ReportApiError> {
        let response = self
            .client
            .put(self.report_url(job_id))
            .json(update)
            .send()
            .await?;

        Self::check_response(response).await
    }

    /// Delete a report the server marked as unrecoverable.
    pub async fn delete_report(&self, job_id: &JobId) -> Result<(), ReportApiError> {
        let response = self.client.delete(self.report_url(job_id)).send().await?;

        Self::check_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ReportApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ReportApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ReportApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Check the status code, then the `success` flag when the body has one.
    async fn check_response(response: reqwest::Response) -> Result<(), ReportApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(ApiResponse { success: false, message }) => Err(ReportApiError::Rejected(
                message.unwrap_or_else(|| "no message".into()),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ReportService for ReportApi {
    async fn update(&self, job_id: &JobId, update: &ReportUpdate) -> Result<(), ReportApiError> {
        self.update_report(job_id, update).await
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), ReportApiError> {
        self.delete_report(job_id).await
    }
}
