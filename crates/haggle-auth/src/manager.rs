//! Credential lifecycle: shared state, renewal loop, escalation.
//!
//! The manager owns the current token behind a lock so any task can check
//! validity without blocking. A spawned refresh loop renews the token on a
//! fixed interval and reports lifecycle events over a channel; the
//! connection supervisor reconnects on `Refreshed` (the gateway binds the
//! registration to the token) and on `Exhausted`.

use std::sync::Arc;
use std::time::Duration;

use haggle_core::{CredentialError, DeviceId, now_ms};
use haggle_settings::CredentialSettings;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::source::CredentialSource;

/// A token plus the time it was issued.
#[derive(Clone, Debug)]
pub struct Credential {
    /// Access token presented during registration.
    pub token: String,
    /// When the token was obtained, Unix ms.
    pub issued_at: i64,
}

/// Lifecycle events emitted by the refresh loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A new token is in place; the connection must re-register.
    Refreshed,
    /// Renewal failed `max_failures` times in a row.
    Exhausted,
}

/// Owns credential state and the renewal schedule.
pub struct CredentialManager {
    source: Arc<dyn CredentialSource>,
    settings: CredentialSettings,
    device_id: DeviceId,
    state: RwLock<Option<Credential>>,
}

impl CredentialManager {
    /// Create a manager; no token is held until [`Self::initialize`].
    pub fn new(
        source: Arc<dyn CredentialSource>,
        settings: CredentialSettings,
        device_id: DeviceId,
    ) -> Self {
        Self {
            source,
            settings,
            device_id,
            state: RwLock::new(None),
        }
    }

    /// Fetch the initial token. Fails hard; without a token there is
    /// nothing to register with.
    pub async fn initialize(&self) -> Result<String, CredentialError> {
        let token = self.source.fetch(&self.device_id).await?;
        info!("initial credential obtained");
        *self.state.write() = Some(Credential {
            token: token.clone(),
            issued_at: now_ms(),
        });
        Ok(token)
    }

    /// Current token, if one is held.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.state.read().as_ref().map(|c| c.token.clone())
    }

    /// Whether a token is held and younger than the refresh interval.
    /// Non-blocking; safe to call from any task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.read().as_ref().is_some_and(|c| {
            let age = now_ms().saturating_sub(c.issued_at);
            u64::try_from(age).is_ok_and(|age| age < self.settings.refresh_interval_ms)
        })
    }

    async fn refresh(&self) -> Result<(), CredentialError> {
        let token = self.source.fetch(&self.device_id).await?;
        *self.state.write() = Some(Credential {
            token,
            issued_at: now_ms(),
        });
        Ok(())
    }

    /// Retry delay after `failures` consecutive failures: doubles from the
    /// configured retry delay, capped at the refresh interval.
    fn retry_delay_ms(&self, failures: u32) -> u64 {
        let base = self.settings.retry_delay_ms;
        let doubled = base.saturating_mul(1u64 << failures.saturating_sub(1).min(31));
        doubled.min(self.settings.refresh_interval_ms)
    }

    /// Spawn the renewal loop. Runs until `cancel` fires.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        events: mpsc::Sender<CredentialEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                let delay_ms = if failures == 0 {
                    manager.settings.refresh_interval_ms
                } else {
                    manager.retry_delay_ms(failures)
                };

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }

                match manager.refresh().await {
                    Ok(()) => {
                        info!("credential renewed");
                        failures = 0;
                        if events.try_send(CredentialEvent::Refreshed).is_err() {
                            warn!("credential event channel unavailable");
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(failures, error = %e, "credential renewal failed");
                        if failures >= manager.settings.max_failures {
                            if events.try_send(CredentialEvent::Exhausted).is_err() {
                                warn!("credential event channel unavailable");
                            }
                            failures = 0;
                        }
                    }
                }
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
