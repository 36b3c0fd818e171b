//! Per-session batching of inbound chat messages.
//!
//! Buyers often send several short messages in a burst ("在吗", "这个",
//! "能便宜点吗"); answering each one separately reads badly and wastes
//! generation calls. The batcher holds a short collecting window per
//! session and flushes the burst as one [`Batch`].
//!
//! The batcher is a single actor task. Each session moves through
//! `Idle -> Collecting -> Idle`: the first message opens a batch and arms
//! a deadline; the batch flushes when it reaches the size cap or when the
//! deadline fires, whichever comes first. Deadlines are generation-tagged
//! so a timer armed for an already-flushed batch is ignored. Sessions that
//! stay idle past the eviction period are dropped from the map.

use std::collections::HashMap;
use std::time::Duration;

use haggle_core::{Batch, ChatPayload, SessionError, SessionId, now_ms};
use haggle_settings::BatchingSettings;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const CMD_QUEUE_DEPTH: usize = 256;

enum BatcherCmd {
    Message(ChatPayload),
    Deadline {
        session_id: SessionId,
        generation: u64,
    },
}

enum SessionState {
    Idle {
        last_activity: Instant,
    },
    Collecting {
        messages: Vec<ChatPayload>,
        opened_at: i64,
        generation: u64,
    },
}

/// Cloneable front door to the batcher task.
#[derive(Clone)]
pub struct BatcherHandle {
    cmd: mpsc::Sender<BatcherCmd>,
}

impl BatcherHandle {
    /// Feed one chat message into its session's batch.
    pub async fn push(&self, payload: ChatPayload) -> Result<(), SessionError> {
        let session_id = payload.session_id.clone();
        self.cmd
            .send(BatcherCmd::Message(payload))
            .await
            .map_err(|_| SessionError::new(session_id.into_inner(), "batcher stopped"))
    }
}

/// Groups each session's inbound messages into flush-ready batches.
/// Built once, consumed by [`SessionBatcher::run`].
pub struct SessionBatcher {
    settings: BatchingSettings,
    sessions: HashMap<SessionId, SessionState>,
    generation: u64,
    cmd_tx: mpsc::Sender<BatcherCmd>,
    cmd_rx: mpsc::Receiver<BatcherCmd>,
    batches: mpsc::Sender<Batch>,
}

impl SessionBatcher {
    /// Build a batcher that delivers flushed batches on `batches`.
    #[must_use]
    pub fn new(settings: BatchingSettings, batches: mpsc::Sender<Batch>) -> (Self, BatcherHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_QUEUE_DEPTH);
        let handle = BatcherHandle {
            cmd: cmd_tx.clone(),
        };
        let batcher = Self {
            settings,
            sessions: HashMap::new(),
            generation: 0,
            cmd_tx,
            cmd_rx,
            batches,
        };
        (batcher, handle)
    }

    /// Run the actor until `cancel` fires or every handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let sweep_every = Duration::from_millis(self.settings.idle_eviction_ms.max(1));
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(BatcherCmd::Message(payload)) => self.on_message(payload).await,
                    Some(BatcherCmd::Deadline { session_id, generation }) => {
                        self.on_deadline(&session_id, generation).await;
                    }
                    None => break,
                },
                _ = sweep.tick() => self.evict_idle(),
            }
        }
        debug!("session batcher stopped");
    }

    async fn on_message(&mut self, payload: ChatPayload) {
        let session_id = payload.session_id.clone();

        if !self.settings.enabled || self.settings.max_batch_size <= 1 {
            self.flush(&session_id, vec![payload], now_ms()).await;
            return;
        }

        match self.sessions.get_mut(&session_id) {
            Some(SessionState::Collecting { messages, .. }) => {
                messages.push(payload);
                if messages.len() >= self.settings.max_batch_size {
                    // Size cap reached: flush now. The armed deadline will
                    // arrive with a stale generation and be ignored.
                    if let Some(SessionState::Collecting {
                        messages,
                        opened_at,
                        ..
                    }) = self.sessions.remove(&session_id)
                    {
                        self.flush(&session_id, messages, opened_at).await;
                    }
                }
            }
            _ => {
                self.generation += 1;
                let generation = self.generation;
                let _ = self.sessions.insert(
                    session_id.clone(),
                    SessionState::Collecting {
                        messages: vec![payload],
                        opened_at: now_ms(),
                        generation,
                    },
                );
                self.arm_deadline(session_id, generation);
            }
        }
    }

    fn arm_deadline(&self, session_id: SessionId, generation: u64) {
        let window = Duration::from_millis(self.settings.window_ms);
        let cmd = self.cmd_tx.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = cmd
                .send(BatcherCmd::Deadline {
                    session_id,
                    generation,
                })
                .await;
        });
    }

    async fn on_deadline(&mut self, session_id: &SessionId, generation: u64) {
        let current = match self.sessions.get(session_id) {
            Some(SessionState::Collecting { generation, .. }) => *generation,
            _ => {
                trace!(session = %session_id, "deadline for a flushed batch, ignored");
                return;
            }
        };
        if current != generation {
            trace!(session = %session_id, "stale deadline generation, ignored");
            return;
        }
        if let Some(SessionState::Collecting {
            messages,
            opened_at,
            ..
        }) = self.sessions.remove(session_id)
        {
            self.flush(session_id, messages, opened_at).await;
        }
    }

    async fn flush(&mut self, session_id: &SessionId, messages: Vec<ChatPayload>, opened_at: i64) {
        debug!(session = %session_id, size = messages.len(), "flushing batch");
        let batch = Batch {
            session_id: session_id.clone(),
            messages,
            opened_at,
        };
        if self.batches.send(batch).await.is_err() {
            warn!(session = %session_id, "batch consumer gone, batch discarded");
        }
        let _ = self.sessions.insert(
            session_id.clone(),
            SessionState::Idle {
                last_activity: Instant::now(),
            },
        );
    }

    /// Drop sessions that have sat idle past the eviction period. A
    /// collecting session is never evicted; its deadline is in flight.
    fn evict_idle(&mut self) {
        let cutoff = Duration::from_millis(self.settings.idle_eviction_ms);
        let before = self.sessions.len();
        self.sessions.retain(|_, state| match state {
            SessionState::Idle { last_activity } => last_activity.elapsed() < cutoff,
            SessionState::Collecting { .. } => true,
        });
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "idle sessions evicted");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
