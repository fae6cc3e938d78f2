//! Model status polling.

use chatlink_protocol::StatusResponse;
use url::Url;

use crate::error::{Result, SessionError};

/// Fetches the model set from the backend's status endpoint.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: reqwest::Client,
    url: Url,
}

impl StatusPoller {
    /// Create a poller for `url`.
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    /// The status endpoint this poller queries.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the current model set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Http`] if the request cannot be sent, or
    /// [`SessionError::Status`] if the backend answers with a non-success
    /// status or a body that is not a status document.
    pub async fn fetch(&self) -> Result<StatusResponse> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| SessionError::Http(format!("status request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status(format!(
                "server returned {}",
                status.as_u16()
            )));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Status(format!("invalid status body: {e}")))?;
        tracing::debug!(
            models = body.models.len(),
            current = body.current_model.as_deref().unwrap_or(""),
            "model status fetched"
        );
        Ok(body)
    }
}
