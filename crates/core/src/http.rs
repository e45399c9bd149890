use crate::StoreError;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client shared by every adapter: bounded per-request timeout and a
/// `pdf-ingest/{version}` user agent.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .user_agent(concat!("pdf-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Reads a non-success response into a [`StoreError::BackendResponse`].
pub(crate) async fn backend_error(backend: &str, response: reqwest::Response) -> StoreError {
    StoreError::BackendResponse {
        backend: backend.to_string(),
        details: response_details(response).await,
    }
}

/// Status line plus the trimmed body, when there is one.
pub(crate) async fn response_details(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    }
}

/// Statuses with which an index refuses a whole batch because of its content.
pub(crate) fn is_batch_rejection(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE
}
