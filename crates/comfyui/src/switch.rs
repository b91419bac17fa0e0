//! Home Assistant switch control used to power on the execution server.

use std::time::Duration;

/// Per-call timeout for the Home Assistant service call.
const SWITCH_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a Home Assistant service call.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("Home Assistant request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Home Assistant refused the call ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Minimal Home Assistant REST client.
#[derive(Clone)]
pub struct HomeAssistant {
    client: reqwest::Client,
    token: String,
}

impl HomeAssistant {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), token)
    }

    pub fn with_client(client: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    /// `POST {base_url}/api/services/switch/turn_on` for `entity_id`.
    ///
    /// Succeeds when Home Assistant accepted the call; whether the switch
    /// actually powered anything is only observable through the server
    /// becoming reachable.
    pub async fn turn_on(&self, base_url: &str, entity_id: &str) -> Result<(), SwitchError> {
        let url = format!(
            "{}/api/services/switch/turn_on",
            base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "entity_id": entity_id }))
            .timeout(SWITCH_CALL_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SwitchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
