//! The connection supervisor: one task that owns the gateway connection
//! for the lifetime of the process.
//!
//! The supervisor dials through a [`TransportConnector`], runs the
//! registration handshake, then serves a single select loop until the
//! session ends: inbound frames are decoded, acknowledged, and fanned out
//! to subscribers; outbound chat waits in a bounded queue that only drains
//! while the current credential is valid, shedding its oldest entry when
//! full; liveness probes bypass that gate on their own channel. Any
//! session end funnels back into one reconnect path with exponential
//! backoff. The writer never leaves this task, so all writes are
//! serialized by construction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use haggle_auth::{CredentialEvent, CredentialManager};
use haggle_codec::{EncodeContext, decode_text, encode_outbound};
use haggle_core::{DeviceId, Frame, FrameKind, OutboundMessage, TransportError};
use haggle_settings::{GatewaySettings, HeartbeatSettings};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::heartbeat::{HeartbeatOutcome, ProbeState, run_heartbeat};
use crate::transport::{TransportConnector, TransportReader, TransportWriter};

/// Probes are small and frequent; they never need a deep queue.
const PROBE_QUEUE_DEPTH: usize = 4;

/// The gateway needs a moment after registration before it accepts the
/// sync acknowledgment.
const REGISTRATION_SETTLE: Duration = Duration::from_secs(1);

/// Connection lifecycle, published on a watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// No connection; a reconnect may be pending.
    Disconnected,
    /// Dialing and registering.
    Connecting,
    /// Registered and serving traffic.
    Connected,
    /// Established but unhealthy: a liveness probe went unanswered or
    /// credential renewal gave up. Teardown is imminent.
    Degraded,
    /// Graceful shutdown; no reconnect will follow.
    Closing,
}

/// How one established session ended.
enum SessionEnd {
    /// Shutdown was requested; leave the reconnect loop.
    Shutdown,
    /// The session was lost; reconnect with backoff.
    Lost {
        /// Whether registration completed before the loss. A registered
        /// session resets the backoff sequence.
        registered: bool,
    },
}

/// Bounded outbound queue. A full queue sheds its oldest entry with a
/// warning; producers never block on it.
struct OutboundQueue {
    inner: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    depth: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    fn new(depth: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(depth)),
            notify: Notify::new(),
            depth,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a message, evicting the oldest one if the queue is at depth.
    /// Fails only after [`Self::close`].
    fn push(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Send("outbound queue closed".into()));
        }
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.depth {
                let _ = queue.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(total, depth = self.depth, "outbound queue full, oldest message dropped");
            }
            queue.push_back(msg);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next queued message. Cancel-safe: a message only
    /// leaves the queue when it is returned.
    async fn pop(&self) -> OutboundMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.inner.lock().pop_front() {
                return msg;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cloneable front door to the supervisor task.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: Arc<OutboundQueue>,
    state: watch::Receiver<ConnState>,
    dropped_frames: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`. Returns `false` if the
    /// supervisor is gone.
    pub async fn wait_for(&mut self, target: ConnState) -> bool {
        self.state.wait_for(|s| *s == target).await.is_ok()
    }

    /// Queue an outbound message. Never blocks: a full queue sheds its
    /// oldest entry instead. Fails only when the supervisor has stopped.
    pub fn send(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        self.outbound.push(msg)
    }

    /// Total inbound frames dropped because a subscriber queue was full.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Total outbound messages shed because the queue was at depth.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.outbound.dropped()
    }
}

/// Owns the connection lifecycle. Built once, then consumed by
/// [`ConnectionSupervisor::run`].
pub struct ConnectionSupervisor {
    connector: Arc<dyn TransportConnector>,
    credentials: Arc<CredentialManager>,
    gateway: GatewaySettings,
    heartbeat: HeartbeatSettings,
    device_id: DeviceId,
    outbound: Arc<OutboundQueue>,
    cred_events: mpsc::Receiver<CredentialEvent>,
    subscribers: Vec<mpsc::Sender<Frame>>,
    dropped_frames: Arc<AtomicU64>,
    state_tx: watch::Sender<ConnState>,
}

impl ConnectionSupervisor {
    /// Build a supervisor and its handle. Subscribers must be registered
    /// with [`Self::subscribe`] before [`Self::run`] consumes the
    /// supervisor.
    #[must_use]
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        credentials: Arc<CredentialManager>,
        gateway: GatewaySettings,
        heartbeat: HeartbeatSettings,
        device_id: DeviceId,
        cred_events: mpsc::Receiver<CredentialEvent>,
    ) -> (Self, ConnectionHandle) {
        let outbound = Arc::new(OutboundQueue::new(gateway.outbound_queue_depth.max(1)));
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let handle = ConnectionHandle {
            outbound: Arc::clone(&outbound),
            state: state_rx,
            dropped_frames: Arc::clone(&dropped_frames),
        };
        let supervisor = Self {
            connector,
            credentials,
            gateway,
            heartbeat,
            device_id,
            outbound,
            cred_events,
            subscribers: Vec::new(),
            dropped_frames,
            state_tx,
        };
        (supervisor, handle)
    }

    /// Register an inbound frame subscriber. Delivery is `try_send`: a
    /// full subscriber queue drops the frame rather than stalling the
    /// read loop.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.push(tx);
        rx
    }

    /// Run the connect/serve/reconnect loop until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let reconnect = self.gateway.reconnect.clone();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let _ = self.state_tx.send_replace(ConnState::Connecting);

            match self.connect_and_serve(&cancel).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost { registered } => {
                    if registered {
                        attempt = 0;
                    }
                    let _ = self.state_tx.send_replace(ConnState::Disconnected);
                    let delay = reconnect.delay_ms(attempt, rand::random());
                    attempt = attempt.saturating_add(1);
                    info!(attempt, delay_ms = delay, "reconnecting after backoff");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
            }
        }

        self.outbound.close();
        let _ = self.state_tx.send_replace(ConnState::Closing);
        info!("connection supervisor stopped");
    }

    /// Dial, register, and serve one session to its end.
    async fn connect_and_serve(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let credentials = Arc::clone(&self.credentials);
        let connector = Arc::clone(&self.connector);
        let dropped_frames = Arc::clone(&self.dropped_frames);
        let app_key = self.gateway.app_key.clone();
        let user_agent = self.gateway.user_agent.clone();
        let expiry_ms = self.gateway.message_expiry_ms;
        let device_id = self.device_id.as_str().to_owned();
        let heartbeat = self.heartbeat.clone();

        let subscribers = &self.subscribers;
        let state_tx = &self.state_tx;
        let outbound = &self.outbound;
        let cred_events = &mut self.cred_events;

        // A stale token would be rejected at registration; renew first.
        let token = match credentials.token().filter(|_| credentials.is_valid()) {
            Some(token) => token,
            None => match credentials.initialize().await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "credential fetch failed before connect");
                    return SessionEnd::Lost { registered: false };
                }
            },
        };

        let (mut writer, mut reader) = match connector.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "gateway connect failed");
                return SessionEnd::Lost { registered: false };
            }
        };

        let ctx = EncodeContext {
            app_key: &app_key,
            user_agent: &user_agent,
        };

        let register = encode_outbound(&OutboundMessage::Register { token, device_id }, &ctx);
        if let Err(e) = writer.send(register).await {
            warn!(error = %e, "registration write failed");
            return SessionEnd::Lost { registered: false };
        }
        tokio::select! {
            () = cancel.cancelled() => {
                writer.close().await;
                return SessionEnd::Shutdown;
            }
            () = tokio::time::sleep(REGISTRATION_SETTLE) => {}
        }
        if let Err(e) = writer.send(encode_outbound(&OutboundMessage::SyncAck, &ctx)).await {
            warn!(error = %e, "sync ack write failed");
            return SessionEnd::Lost { registered: false };
        }

        let _ = state_tx.send_replace(ConnState::Connected);
        info!("gateway session established");

        let probe_state = Arc::new(ProbeState::new());
        let (probe_tx, mut probe_rx) = mpsc::channel(PROBE_QUEUE_DEPTH);
        let hb_cancel = cancel.child_token();
        let mut monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&probe_state),
            probe_tx,
            heartbeat,
            hb_cancel.clone(),
        ));

        let mut creds_open = true;
        let end = loop {
            tokio::select! {
                inbound = reader.recv() => match inbound {
                    Some(Ok(text)) => match decode_text(&text, expiry_ms) {
                        Ok(frame) => {
                            if frame.kind == FrameKind::HeartbeatAck {
                                probe_state.mark_acked();
                            } else {
                                if let (Some(mid), Some(sid)) = (frame.mid.clone(), frame.sid.clone()) {
                                    let ack = encode_outbound(&OutboundMessage::Ack { mid, sid }, &ctx);
                                    if writer.send(ack).await.is_err() {
                                        break SessionEnd::Lost { registered: true };
                                    }
                                }
                                match frame.kind {
                                    FrameKind::Chat => {
                                        fan_out(subscribers, &dropped_frames, &frame);
                                    }
                                    FrameKind::Expired => {
                                        debug!(session = ?frame.session_id, "expired chat frame dropped");
                                    }
                                    _ => trace!(kind = ?frame.kind, "system traffic"),
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping undecodable frame"),
                    },
                    Some(Err(e)) => {
                        warn!(error = %e, "connection lost");
                        break SessionEnd::Lost { registered: true };
                    }
                    None => {
                        info!("gateway closed the stream");
                        break SessionEnd::Lost { registered: true };
                    }
                },

                // Chat only leaves the queue under a valid credential;
                // otherwise it parks there until the next refresh.
                msg = outbound.pop(), if credentials.is_valid() => {
                    if let Err(e) = writer.send(encode_outbound(&msg, &ctx)).await {
                        warn!(error = %e, "outbound write failed");
                        break SessionEnd::Lost { registered: true };
                    }
                }

                probe = probe_rx.recv() => match probe {
                    Some(msg) => {
                        if let Err(e) = writer.send(encode_outbound(&msg, &ctx)).await {
                            warn!(error = %e, "probe write failed");
                            break SessionEnd::Lost { registered: true };
                        }
                    }
                    // The monitor only drops its sender when it returns.
                    None => {
                        let outcome = (&mut monitor).await.unwrap_or(HeartbeatOutcome::Cancelled);
                        if outcome == HeartbeatOutcome::TimedOut {
                            let _ = state_tx.send_replace(ConnState::Degraded);
                            warn!("heartbeat window expired, tearing connection down");
                            // Let watchers observe the transition before
                            // the reconnect path overwrites it.
                            tokio::task::yield_now().await;
                            break SessionEnd::Lost { registered: true };
                        }
                        break SessionEnd::Shutdown;
                    }
                },

                event = cred_events.recv(), if creds_open => match event {
                    Some(CredentialEvent::Refreshed) => {
                        info!("credential refreshed, re-registering");
                        break SessionEnd::Lost { registered: true };
                    }
                    Some(CredentialEvent::Exhausted) => {
                        let _ = state_tx.send_replace(ConnState::Degraded);
                        warn!("credential renewal exhausted, forcing reconnect");
                        // Let watchers observe the transition before
                        // the reconnect path overwrites it.
                        tokio::task::yield_now().await;
                        break SessionEnd::Lost { registered: true };
                    }
                    None => creds_open = false,
                },

                () = cancel.cancelled() => break SessionEnd::Shutdown,
            }
        };

        hb_cancel.cancel();
        monitor.abort();
        writer.close().await;
        end
    }
}

/// Deliver one frame to every subscriber without blocking the read loop.
fn fan_out(subscribers: &[mpsc::Sender<Frame>], dropped: &AtomicU64, frame: &Frame) {
    for sub in subscribers {
        if sub.try_send(frame.clone()).is_err() {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(total, "subscriber queue full, frame dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haggle_auth::CredentialSource;
    use haggle_core::{CredentialError, now_ms};
    use haggle_settings::CredentialSettings;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicU32;

    // ── fakes ────────────────────────────────────────────────────────────

    struct FakeSource;

    #[async_trait]
    impl CredentialSource for FakeSource {
        async fn fetch(&self, _device_id: &DeviceId) -> Result<String, CredentialError> {
            Ok("tok-test".into())
        }
    }

    /// Test-side ends of one fake connection.
    struct TestLink {
        /// Inject traffic toward the supervisor.
        inbound: mpsc::UnboundedSender<String>,
        /// Observe what the supervisor wrote.
        outbound: mpsc::UnboundedReceiver<String>,
    }

    struct FakeConnector {
        fail_remaining: AtomicU32,
        attempts: AtomicU32,
        links: mpsc::UnboundedSender<TestLink>,
    }

    impl FakeConnector {
        fn new(fail_first: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<TestLink>) {
            let (links, link_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                fail_remaining: AtomicU32::new(fail_first),
                attempts: AtomicU32::new(0),
                links,
            });
            (connector, link_rx)
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl TransportConnector for FakeConnector {
        async fn connect(
            &self,
        ) -> Result<(Box<dyn TransportWriter>, Box<dyn TransportReader>), TransportError>
        {
            let _ = self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.fail_remaining.load(Ordering::Relaxed) > 0 {
                let _ = self.fail_remaining.fetch_sub(1, Ordering::Relaxed);
                return Err(TransportError::Connect {
                    endpoint: "fake".into(),
                    message: "refused".into(),
                });
            }
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let _ = self.links.send(TestLink {
                inbound: in_tx,
                outbound: out_rx,
            });
            Ok((Box::new(FakeWriter { tx: out_tx }), Box::new(FakeReader { rx: in_rx })))
        }
    }

    struct FakeWriter {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl TransportWriter for FakeWriter {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.tx
                .send(text)
                .map_err(|_| TransportError::Send("peer gone".into()))
        }

        async fn close(&mut self) {}
    }

    struct FakeReader {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl TransportReader for FakeReader {
        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await.map(Ok)
        }
    }

    // ── wiring helpers ───────────────────────────────────────────────────

    async fn new_supervisor(
        connector: Arc<FakeConnector>,
        refresh_interval_ms: u64,
    ) -> (
        ConnectionSupervisor,
        ConnectionHandle,
        mpsc::Sender<CredentialEvent>,
    ) {
        new_supervisor_with(connector, refresh_interval_ms, GatewaySettings::default()).await
    }

    async fn new_supervisor_with(
        connector: Arc<FakeConnector>,
        refresh_interval_ms: u64,
        gateway: GatewaySettings,
    ) -> (
        ConnectionSupervisor,
        ConnectionHandle,
        mpsc::Sender<CredentialEvent>,
    ) {
        let creds = Arc::new(CredentialManager::new(
            Arc::new(FakeSource),
            CredentialSettings {
                refresh_interval_ms,
                ..CredentialSettings::default()
            },
            DeviceId::derive("seller-1"),
        ));
        creds.initialize().await.unwrap();

        let (cred_tx, cred_rx) = mpsc::channel(4);
        let (supervisor, handle) = ConnectionSupervisor::new(
            connector,
            creds,
            gateway,
            HeartbeatSettings::default(),
            DeviceId::derive("seller-1"),
            cred_rx,
        );
        (supervisor, handle, cred_tx)
    }

    async fn complete_handshake(link: &mut TestLink) {
        let register: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(register["lwp"], "/reg");
        assert_eq!(register["headers"]["token"], "tok-test");
        let sync: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(sync["lwp"], "/r/SyncStatus/ackDiff");
    }

    fn chat_envelope(mid: &str, sid: &str, session: &str, text: &str) -> String {
        chat_envelope_at(mid, sid, session, text, now_ms())
    }

    fn chat_envelope_at(mid: &str, sid: &str, session: &str, text: &str, sent_at: i64) -> String {
        let inner = json!({
            "1": {
                "2": format!("{session}@goofish"),
                "5": sent_at,
                "10": {
                    "reminderTitle": "Buyer",
                    "senderUserId": "buyer-1",
                    "reminderContent": text,
                    "reminderUrl": "https://www.goofish.com/item?itemId=itm-7"
                }
            }
        });
        json!({
            "headers": {"mid": mid, "sid": sid},
            "body": {"syncPushPackage": {"data": [{"data": inner.to_string()}]}}
        })
        .to_string()
    }

    // ── tests ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn registers_and_acks_sync_on_connect() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, mut handle, _cred_tx) = new_supervisor(connector, 3_600_000).await;
        let cancel = CancellationToken::new();
        let _task = tokio::spawn(supervisor.run(cancel.clone()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;
        assert!(handle.wait_for(ConnState::Connected).await);

        cancel.cancel();
        assert!(handle.wait_for(ConnState::Closing).await);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_chat_is_acked_and_dispatched() {
        let (connector, mut links) = FakeConnector::new(0);
        let (mut supervisor, _handle, _cred_tx) = new_supervisor(connector, 3_600_000).await;
        let mut frames = supervisor.subscribe(8);
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        link.inbound
            .send(chat_envelope("mid-1", "sid-1", "chat-1", "还在吗"))
            .unwrap();

        let ack: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(ack["code"], 200);
        assert_eq!(ack["headers"]["mid"], "mid-1");
        assert_eq!(ack["headers"]["sid"], "sid-1");

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Chat);
        assert_eq!(frame.chat.unwrap().content, "还在吗");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_chat_is_acked_but_not_dispatched() {
        let (connector, mut links) = FakeConnector::new(0);
        let (mut supervisor, _handle, _cred_tx) = new_supervisor(connector, 3_600_000).await;
        let mut frames = supervisor.subscribe(8);
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        let stale = now_ms() - 600_000;
        link.inbound
            .send(chat_envelope_at("mid-old", "sid-1", "chat-1", "old", stale))
            .unwrap();
        let ack: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(ack["headers"]["mid"], "mid-old");

        // A fresh message flows through; the stale one never did.
        link.inbound
            .send(chat_envelope("mid-new", "sid-1", "chat-1", "fresh"))
            .unwrap();
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.chat.unwrap().content, "fresh");
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_probe_keeps_the_session() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, _handle, _cred_tx) = new_supervisor(Arc::clone(&connector), 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        let probe: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(probe["lwp"], "/!");
        let mid = probe["headers"]["mid"].as_str().unwrap();
        link.inbound
            .send(json!({"code": 200, "headers": {"mid": mid}}).to_string())
            .unwrap();

        // Next write is the following probe, not a re-registration.
        let next: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(next["lwp"], "/!");
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probe_degrades_and_reconnects() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, handle, _cred_tx) = new_supervisor(Arc::clone(&connector), 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        let mut watcher = handle.clone();
        let saw_degraded =
            tokio::spawn(async move { watcher.wait_for(ConnState::Degraded).await });

        let probe: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(probe["lwp"], "/!");
        // No ack: the timeout elapses and a fresh connection is dialed.
        let mut second = links.recv().await.unwrap();
        complete_handshake(&mut second).await;
        assert_eq!(connector.attempts(), 2);
        assert!(saw_degraded.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_chat_parks_while_credential_invalid() {
        // Zero refresh interval: the token is never considered valid.
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, handle, _cred_tx) = new_supervisor(connector, 0).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        handle
            .send(OutboundMessage::Chat {
                session_id: "chat-1".into(),
                to_user: "buyer-1".into(),
                text: "gated".into(),
            })
            .unwrap();

        // The next write is a liveness probe; the chat stayed queued.
        let next: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(next["lwp"], "/!");
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_chat_flows_under_valid_credential() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, handle, _cred_tx) = new_supervisor(connector, 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        handle
            .send(OutboundMessage::Chat {
                session_id: "chat-1".into(),
                to_user: "buyer-1".into(),
                text: "包邮的亲".into(),
            })
            .unwrap();

        let sent: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(sent["lwp"], "/r/MessageSend/sendByReceiverScope");
        assert_eq!(sent["body"][0]["cid"], "chat-1@goofish");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_drops_frames_without_stalling() {
        let (connector, mut links) = FakeConnector::new(0);
        let (mut supervisor, handle, _cred_tx) = new_supervisor(connector, 3_600_000).await;
        let mut frames = supervisor.subscribe(1);
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        for i in 0..3 {
            link.inbound
                .send(chat_envelope(&format!("mid-{i}"), "sid-1", "chat-1", "hi"))
                .unwrap();
        }
        // All three are still acknowledged.
        for i in 0..3 {
            let ack: Value = serde_json::from_str(&link.outbound.recv().await.unwrap()).unwrap();
            assert_eq!(ack["headers"]["mid"], format!("mid-{i}"));
        }

        assert_eq!(frames.recv().await.unwrap().mid, Some("mid-0".into()));
        assert_eq!(handle.frames_dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_back_off_and_retry() {
        let (connector, mut links) = FakeConnector::new(2);
        let (supervisor, mut handle, _cred_tx) = new_supervisor(Arc::clone(&connector), 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;
        assert!(handle.wait_for(ConnState::Connected).await);
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_exhaustion_degrades_then_reconnects() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, mut handle, cred_tx) = new_supervisor(Arc::clone(&connector), 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;
        assert!(handle.wait_for(ConnState::Connected).await);

        let mut watcher = handle.clone();
        let sequence = tokio::spawn(async move {
            let degraded = watcher.wait_for(ConnState::Degraded).await;
            let reconnected = watcher.wait_for(ConnState::Connected).await;
            (degraded, reconnected)
        });
        // Let the watcher arm before the event lands.
        tokio::task::yield_now().await;

        cred_tx.send(CredentialEvent::Exhausted).await.unwrap();

        let mut second = links.recv().await.unwrap();
        complete_handshake(&mut second).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(sequence.await.unwrap(), (true, true));
    }

    #[tokio::test]
    async fn outbound_queue_sheds_its_oldest_entry() {
        let queue = OutboundQueue::new(2);
        for mid in ["m-0", "m-1", "m-2"] {
            queue
                .push(OutboundMessage::Heartbeat { mid: mid.into() })
                .unwrap();
        }
        assert_eq!(queue.dropped(), 1);

        // The first message gave way; the newer two survive in order.
        let OutboundMessage::Heartbeat { mid } = queue.pop().await else {
            panic!("expected a heartbeat");
        };
        assert_eq!(mid.as_str(), "m-1");
        let OutboundMessage::Heartbeat { mid } = queue.pop().await else {
            panic!("expected a heartbeat");
        };
        assert_eq!(mid.as_str(), "m-2");

        queue.close();
        assert!(queue.push(OutboundMessage::SyncAck).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_never_blocks_the_producer() {
        // Zero refresh interval keeps the credential invalid, so nothing
        // drains; depth 2 makes the third send evict the first.
        let (connector, mut links) = FakeConnector::new(0);
        let gateway = GatewaySettings {
            outbound_queue_depth: 2,
            ..GatewaySettings::default()
        };
        let (supervisor, handle, _cred_tx) = new_supervisor_with(connector, 0, gateway).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        for i in 0..3 {
            handle
                .send(OutboundMessage::Chat {
                    session_id: "chat-1".into(),
                    to_user: "buyer-1".into(),
                    text: format!("reply {i}"),
                })
                .unwrap();
        }
        assert_eq!(handle.messages_dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_triggers_reconnect() {
        let (connector, mut links) = FakeConnector::new(0);
        let (supervisor, _handle, _cred_tx) = new_supervisor(Arc::clone(&connector), 3_600_000).await;
        let _task = tokio::spawn(supervisor.run(CancellationToken::new()));

        let mut link = links.recv().await.unwrap();
        complete_handshake(&mut link).await;

        drop(link.inbound);

        let mut second = links.recv().await.unwrap();
        complete_handshake(&mut second).await;
        assert_eq!(connector.attempts(), 2);
    }
}
