//! The reply pipeline: frames in, safe replies out.
//!
//! `run_frames` splits inbound chat traffic: operator messages feed the
//! takeover registry and history, buyer messages are recorded and pushed
//! into the batcher. `run_batches` picks up flushed batches and processes
//! each in its own task, so one chat's slow generation or store error
//! never holds up another chat.

use std::sync::Arc;

use async_trait::async_trait;
use haggle_connection::ConnectionHandle;
use haggle_core::{Batch, ChatPayload, Frame, OutboundMessage, SessionId, TransportError};
use haggle_history::{ChatRole, ConversationStore};
use haggle_routing::{
    GenerationRequest, Intent, PromptTurn, ResponseGenerator, RoutingContext, RoutingEngine,
    SafetyFilter, generate_with_timeout,
};
use haggle_session::BatcherHandle;
use haggle_settings::SettingsHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::items::{ItemLookup, item_context};
use crate::takeover::TakeoverRegistry;

/// Where finished replies go. [`ConnectionHandle`] in production, a
/// channel fake in tests.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_chat(
        &self,
        session_id: &SessionId,
        to_user: &str,
        text: &str,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl ReplySink for ConnectionHandle {
    async fn send_chat(
        &self,
        session_id: &SessionId,
        to_user: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        self.send(OutboundMessage::Chat {
            session_id: session_id.clone(),
            to_user: to_user.to_owned(),
            text: text.to_owned(),
        })
    }
}

/// Everything batch processing needs, shared across per-batch tasks.
pub struct Pipeline {
    settings: SettingsHandle,
    store: Arc<dyn ConversationStore>,
    items: Arc<dyn ItemLookup>,
    generator: Arc<dyn ResponseGenerator>,
    takeover: Arc<TakeoverRegistry>,
    sink: Arc<dyn ReplySink>,
    user_id: String,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        settings: SettingsHandle,
        store: Arc<dyn ConversationStore>,
        items: Arc<dyn ItemLookup>,
        generator: Arc<dyn ResponseGenerator>,
        takeover: Arc<TakeoverRegistry>,
        sink: Arc<dyn ReplySink>,
        user_id: String,
    ) -> Self {
        Self {
            settings,
            store,
            items,
            generator,
            takeover,
            sink,
            user_id,
        }
    }

    /// Consume dispatched chat frames until `cancel` fires.
    pub async fn run_frames(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<Frame>,
        batcher: BatcherHandle,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if let Some(chat) = frame.chat {
                            self.on_chat(chat, &batcher).await;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("frame pipeline stopped");
    }

    async fn on_chat(&self, chat: ChatPayload, batcher: &BatcherHandle) {
        if chat.sender_id == self.user_id {
            self.on_seller_message(&chat);
            return;
        }

        if let Err(e) = self.store.append_message(
            &chat.session_id,
            &chat.sender_id,
            chat.item_id.as_ref(),
            ChatRole::User,
            &chat.content,
        ) {
            warn!(session = %chat.session_id, error = %e, "history write failed");
        }
        if let Err(e) = batcher.push(chat).await {
            warn!(error = %e, "batcher rejected message");
        }
    }

    /// Operator traffic: the toggle keyword flips the chat's mode; any
    /// other reply is the operator answering by hand and goes into
    /// history as an assistant turn.
    fn on_seller_message(&self, chat: &ChatPayload) {
        if self.takeover.is_toggle(&chat.content) {
            let manual = self.takeover.toggle(&chat.session_id);
            info!(session = %chat.session_id, manual, "takeover toggled");
            return;
        }
        if let Err(e) = self.store.append_message(
            &chat.session_id,
            &self.user_id,
            chat.item_id.as_ref(),
            ChatRole::Assistant,
            &chat.content,
        ) {
            warn!(session = %chat.session_id, error = %e, "history write failed");
        }
    }

    /// Consume flushed batches until `cancel` fires, one task per batch.
    pub async fn run_batches(
        self: Arc<Self>,
        mut batches: mpsc::Receiver<Batch>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        let pipeline = Arc::clone(&self);
                        let _ = tokio::spawn(async move {
                            pipeline.process_batch(batch).await;
                        });
                    }
                    None => break,
                },
            }
        }
        debug!("batch pipeline stopped");
    }

    /// Route one batch and send the reply. Every failure inside stays
    /// inside: worst case the buyer gets the configured fallback text.
    pub async fn process_batch(&self, batch: Batch) {
        let settings = self.settings.snapshot();
        let session = batch.session_id.clone();

        if self.takeover.is_manual(&session) {
            debug!(session = %session, "manual mode, reply suppressed");
            return;
        }
        if !settings.routing.enabled {
            debug!(session = %session, "routing disabled, reply suppressed");
            return;
        }

        let history = self
            .store
            .history(&session, settings.store.max_history)
            .unwrap_or_else(|e| {
                warn!(session = %session, error = %e, "history read failed");
                Vec::new()
            });
        let bargain_rounds = self.store.bargain_count(&session).unwrap_or_else(|e| {
            warn!(session = %session, error = %e, "bargain counter read failed");
            0
        });
        let item = match batch.item_id() {
            Some(id) => item_context(self.store.as_ref(), self.items.as_ref(), id).await,
            None => None,
        };

        let engine = RoutingEngine::new(settings.routing.clone());
        let ctx = RoutingContext {
            bargain_rounds,
            history_len: history.len(),
        };
        let decision = engine.decide(&batch, &ctx);

        if decision.intent == Intent::Price {
            if let Err(e) = self.store.increment_bargain_count(&session) {
                warn!(session = %session, error = %e, "bargain counter write failed");
            }
        }

        let request = GenerationRequest {
            decision,
            history: history
                .into_iter()
                .map(|m| PromptTurn {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            content: batch.combined_text(),
            item_context: item,
        };
        let reply = generate_with_timeout(
            self.generator.as_ref(),
            &request,
            settings.routing.generation_timeout_ms,
            &settings.routing.fallback_reply,
        )
        .await;
        let reply = SafetyFilter::new(&settings.routing).apply(&reply);

        let Some(last) = batch.last() else { return };
        if let Err(e) = self.store.append_message(
            &session,
            &self.user_id,
            batch.item_id(),
            ChatRole::Assistant,
            &reply,
        ) {
            warn!(session = %session, error = %e, "history write failed");
        }
        if let Err(e) = self.sink.send_chat(&session, &last.sender_id, &reply).await {
            warn!(session = %session, error = %e, "reply send failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
