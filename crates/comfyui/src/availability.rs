//! Reachability gate with optional remote power-on.
//!
//! The gate runs once per orchestration request. It probes the server,
//! and when the probe fails and activation is configured it asks Home
//! Assistant to switch the server on, then waits for it to come up.
//!
//! ```text
//! CheckingReachable ──ok──────────────────────────────▶ Ready
//!        │ fail
//!        ├── no activation configured ────────────────▶ Unavailable
//!        ▼
//!    Activating ── internal refused ─▶ external ── refused ─▶ Unavailable
//!        │ accepted
//!        ▼
//!  AwaitingStartup ──probe ok──▶ Ready / budget spent ──▶ Unavailable
//! ```

use std::time::Duration;

use crate::api::ComfyUIApi;
use crate::switch::HomeAssistant;

/// Gate states, logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    CheckingReachable,
    Activating,
    AwaitingStartup,
    Ready,
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    /// The gate ended in [`GateState::Unavailable`]; nothing was submitted.
    #[error("ComfyUI server at {url} is unavailable: {reason}")]
    ServerUnavailable { url: String, reason: String },
}

/// Timing of the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Timeout of each reachability probe.
    pub probe_timeout: Duration,
    /// Delay between probes while waiting for startup.
    pub startup_poll: Duration,
    /// Total time to wait for startup after an accepted activation.
    pub startup_budget: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            startup_poll: Duration::from_secs(5),
            startup_budget: Duration::from_secs(300),
        }
    }
}

/// Home Assistant settings needed to power the server on.
#[derive(Debug, Clone, Default)]
pub struct ActivationConfig {
    pub internal_url: Option<String>,
    pub external_url: Option<String>,
    pub token: Option<String>,
    pub switch_entity: Option<String>,
}

impl ActivationConfig {
    /// Activation needs a token, a switch and at least one URL.
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.token)
            && set(&self.switch_entity)
            && (set(&self.internal_url) || set(&self.external_url))
    }

    /// Configured URLs in the order they are tried.
    fn urls(&self) -> impl Iterator<Item = &str> {
        [&self.internal_url, &self.external_url]
            .into_iter()
            .filter_map(|u| u.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// Reachability gate for one ComfyUI instance.
pub struct AvailabilityGate {
    api: ComfyUIApi,
    activation: ActivationConfig,
    config: GateConfig,
}

impl AvailabilityGate {
    pub fn new(api: ComfyUIApi, activation: ActivationConfig) -> Self {
        Self {
            api,
            activation,
            config: GateConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Single probe of `/system_stats`.
    pub async fn is_reachable(&self) -> bool {
        match self.api.system_stats(self.config.probe_timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(url = self.api.api_url(), error = %e, "Reachability probe failed");
                false
            }
        }
    }

    /// Drive the gate to a terminal state.
    pub async fn ensure_available(&self) -> Result<(), AvailabilityError> {
        self.enter(GateState::CheckingReachable);
        if self.is_reachable().await {
            self.enter(GateState::Ready);
            return Ok(());
        }

        if !self.activation.is_configured() {
            return Err(self.unavailable("not reachable and remote activation is not configured"));
        }

        self.enter(GateState::Activating);
        if !self.activate().await {
            return Err(self.unavailable("not reachable and no activation call was accepted"));
        }

        self.enter(GateState::AwaitingStartup);
        if self.await_startup().await {
            self.enter(GateState::Ready);
            Ok(())
        } else {
            Err(self.unavailable(&format!(
                "did not come up within {}s of activation",
                self.config.startup_budget.as_secs()
            )))
        }
    }

    /// Try each configured URL until one accepts the call.
    async fn activate(&self) -> bool {
        let (Some(token), Some(entity)) = (
            self.activation.token.as_deref(),
            self.activation.switch_entity.as_deref(),
        ) else {
            return false;
        };
        let ha = HomeAssistant::new(token);

        for url in self.activation.urls() {
            match ha.turn_on(url, entity).await {
                Ok(()) => {
                    tracing::info!(ha_url = url, entity, "Activation accepted");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(ha_url = url, entity, error = %e, "Activation call failed");
                }
            }
        }
        false
    }

    async fn await_startup(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.startup_budget;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.config.startup_poll).await;
            if self.is_reachable().await {
                return true;
            }
        }
        false
    }

    fn enter(&self, state: GateState) {
        tracing::info!(url = self.api.api_url(), ?state, "Availability gate");
    }

    fn unavailable(&self, reason: &str) -> AvailabilityError {
        self.enter(GateState::Unavailable);
        AvailabilityError::ServerUnavailable {
            url: self.api.api_url().to_string(),
            reason: reason.to_string(),
        }
    }
}
