//! Liveness probing over the established connection.
//!
//! The monitor runs as its own task. Every interval it arms [`ProbeState`],
//! hands a heartbeat message to the supervisor's probe channel, and waits
//! out the ack timeout. The supervisor marks the state acked when any
//! gateway acknowledgment arrives; a silent window ends the monitor with
//! [`HeartbeatOutcome::TimedOut`] and the supervisor tears the connection
//! down. One silent window, one reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use haggle_core::{MessageId, OutboundMessage, now_ms};
use haggle_settings::HeartbeatSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Shared ack flag for the probe in flight.
#[derive(Debug, Default)]
pub struct ProbeState {
    acked: AtomicBool,
}

impl ProbeState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a new probe; clears any previous ack.
    pub fn arm(&self) {
        self.acked.store(false, Ordering::Release);
    }

    /// Record that the gateway answered.
    pub fn mark_acked(&self) {
        self.acked.store(true, Ordering::Release);
    }

    fn acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

/// Why the monitor stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// A probe went unanswered for the full timeout window.
    TimedOut,
    /// The connection is being torn down for another reason.
    Cancelled,
}

/// Run the probe loop until a probe times out or `cancel` fires.
///
/// Probes are queued on `probes`; the supervisor owns the writer and
/// serializes them with the rest of the outbound traffic.
pub async fn run_heartbeat(
    state: Arc<ProbeState>,
    probes: mpsc::Sender<OutboundMessage>,
    settings: HeartbeatSettings,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let interval = Duration::from_millis(settings.interval_ms);
    let timeout = Duration::from_millis(settings.timeout_ms);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            () = tokio::time::sleep(interval) => {}
        }

        let mid = MessageId::for_wire(now_ms());
        trace!(mid = %mid, "sending liveness probe");
        state.arm();
        if probes
            .send(OutboundMessage::Heartbeat { mid })
            .await
            .is_err()
        {
            // Supervisor dropped the probe channel; the session is over.
            return HeartbeatOutcome::Cancelled;
        }

        tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            () = tokio::time::sleep(timeout) => {}
        }

        if !state.acked() {
            warn!(timeout_ms = settings.timeout_ms, "liveness probe unanswered");
            return HeartbeatOutcome::TimedOut;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, advance};

    fn settings() -> HeartbeatSettings {
        HeartbeatSettings {
            interval_ms: 15_000,
            timeout_ms: 5_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probes_are_sent_on_the_interval() {
        let state = Arc::new(ProbeState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&state),
            tx,
            settings(),
            cancel.clone(),
        ));

        advance(Duration::from_millis(15_000)).await;
        let probe = rx.recv().await.unwrap();
        assert!(matches!(probe, OutboundMessage::Heartbeat { .. }));

        cancel.cancel();
        assert_eq!(monitor.await.unwrap(), HeartbeatOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn acked_probe_keeps_the_loop_alive() {
        let state = Arc::new(ProbeState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&state),
            tx,
            settings(),
            cancel.clone(),
        ));

        advance(Duration::from_millis(15_000)).await;
        assert!(rx.recv().await.is_some());
        state.mark_acked();
        advance(Duration::from_millis(5_000)).await;

        // Survives the first window and probes again.
        advance(Duration::from_millis(15_000)).await;
        assert!(rx.recv().await.is_some());

        cancel.cancel();
        assert_eq!(monitor.await.unwrap(), HeartbeatOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probe_times_out() {
        let state = Arc::new(ProbeState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&state),
            tx,
            settings(),
            CancellationToken::new(),
        ));

        advance(Duration::from_millis(15_000)).await;
        assert!(rx.recv().await.is_some());
        advance(Duration::from_millis(5_000)).await;

        assert_eq!(monitor.await.unwrap(), HeartbeatOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ack_does_not_cover_a_new_probe() {
        let state = Arc::new(ProbeState::new());
        let (tx, mut rx) = mpsc::channel(4);
        let monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&state),
            tx,
            settings(),
            CancellationToken::new(),
        ));

        // Ack arrives before the probe; arming must clear it.
        state.mark_acked();
        advance(Duration::from_millis(15_000)).await;
        assert!(rx.recv().await.is_some());
        advance(Duration::from_millis(5_000)).await;

        assert_eq!(monitor.await.unwrap(), HeartbeatOutcome::TimedOut);
    }
}
