use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use portal_core::errors::{TransportError, ValidationError};
use portal_core::events::SessionEvent;
use portal_core::gateway::{ChatGateway, ChatRequest};
use portal_core::ids::{ConversationId, MessageId, ModelId, UserId};
use portal_core::messages::{
    merge_citations, merge_contexts, Citation, ContextUsed, Message, ModelMetadata, Role,
    ToolActivity,
};
use portal_core::research::ActiveResearchJob;
use portal_core::store::ConversationStore;
use portal_core::stream::{DocSummary, StreamEvent};
use portal_core::tokens::{estimate_text_tokens, ModelContextRecord, TokenUsage, UsageSnapshot};
use portal_gateway::FrameParser;

use crate::config::{ModelSelection, SessionConfig, TurnOptions};
use crate::error::SessionError;
use crate::reconciler::MessageReconciler;
use crate::research::{ResearchActivator, ResearchUpdate};
use crate::throttle::StreamThrottle;
use crate::tools::augment_tools;
use crate::usage::ContextUsageTracker;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Cancelling,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed {
        message_id: MessageId,
        content: String,
        latency: Duration,
    },
    Cancelled,
}

struct SessionInner {
    conversation_id: Option<ConversationId>,
    user_id: Option<UserId>,
    model: ModelSelection,
    cancel: CancellationToken,
    state: SessionState,
    research: ResearchActivator,
    input: String,
    turn_seq: u64,
    /// Bumped by every `open_conversation`. The usage tracker belongs to
    /// this generation.
    open_seq: u64,
}

/// Values captured when a turn starts. Later session changes do not leak in.
struct TurnContext {
    seq: u64,
    open_seq: u64,
    conversation_id: Option<ConversationId>,
    user_id: Option<UserId>,
    model: ModelSelection,
    cancel: CancellationToken,
}

/// Accumulators owned by one turn's stream loop.
struct TurnState {
    assistant_id: MessageId,
    placeholder_shown: bool,
    content: String,
    citations: Vec<Citation>,
    contexts: Vec<ContextUsed>,
    usage: Option<TokenUsage>,
    graphrag_tokens: u64,
    model_metadata: Option<ModelMetadata>,
    tool_activity: Vec<ToolActivity>,
    doc_summaries: Vec<DocSummary>,
}

impl TurnState {
    fn new() -> Self {
        Self {
            assistant_id: MessageId::temporary(),
            placeholder_shown: false,
            content: String::new(),
            citations: Vec::new(),
            contexts: Vec::new(),
            usage: None,
            graphrag_tokens: 0,
            model_metadata: None,
            tool_activity: Vec::new(),
            doc_summaries: Vec::new(),
        }
    }

    /// Attach a result to its call, or record it standalone when the call was
    /// never seen.
    fn record_tool_result(
        &mut self,
        call_id: Option<String>,
        name: Option<String>,
        result: serde_json::Value,
    ) -> ToolActivity {
        let existing = self.tool_activity.iter_mut().rev().find(|a| match &call_id {
            Some(id) => a.call_id.as_deref() == Some(id.as_str()),
            None => a.result.is_none() && name.as_deref().is_none_or(|n| n == a.name),
        });
        if let Some(activity) = existing {
            activity.result = Some(result);
            return activity.clone();
        }
        let activity = ToolActivity {
            call_id,
            name: name.unwrap_or_default(),
            arguments: serde_json::Value::Null,
            result: Some(result),
        };
        self.tool_activity.push(activity.clone());
        activity
    }
}

enum TurnEnd {
    Done,
    Cancelled,
    Failed(TransportError),
}

/// Drives chat turns for one conversation view.
///
/// Owns the displayed message list, the per-model usage tracker and the
/// cancellation token of the in-flight turn. Everything a renderer needs is
/// published on [`subscribe`](Self::subscribe).
pub struct ChatSession {
    gateway: Arc<dyn ChatGateway>,
    store: Arc<dyn ConversationStore>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    reconciler: Arc<Mutex<MessageReconciler>>,
    usage: Arc<Mutex<ContextUsageTracker>>,
    inner: Mutex<SessionInner>,
}

impl ChatSession {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: Arc<dyn ConversationStore>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let model = config.default_model.clone();
        let usage = ContextUsageTracker::new(
            model.model_id.clone(),
            model.max_tokens,
            model.model_name.clone(),
        );
        Self {
            gateway,
            store,
            config,
            events,
            reconciler: Arc::new(Mutex::new(MessageReconciler::new())),
            usage: Arc::new(Mutex::new(usage)),
            inner: Mutex::new(SessionInner {
                conversation_id: None,
                user_id: None,
                model,
                cancel: CancellationToken::new(),
                state: SessionState::Idle,
                research: ResearchActivator::new(),
                input: String::new(),
                turn_seq: 0,
                open_seq: 0,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.lock().conversation_id.clone()
    }

    pub fn set_user(&self, user_id: Option<UserId>) {
        self.inner.lock().user_id = user_id;
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner.lock().input = text.into();
    }

    pub fn input(&self) -> String {
        self.inner.lock().input.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.reconciler.lock().messages()
    }

    /// Usage of the active model.
    pub fn usage(&self) -> UsageSnapshot {
        self.usage.lock().get_usage()
    }

    pub fn usage_for(&self, model_id: &ModelId) -> Option<UsageSnapshot> {
        self.usage.lock().usage_for(model_id)
    }

    pub fn active_research(&self) -> Option<ActiveResearchJob> {
        self.inner.lock().research.active().cloned()
    }

    /// Abort the in-flight turn. Returns false when nothing was streaming.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Streaming {
            return false;
        }
        inner.state = SessionState::Cancelling;
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        info!(turn = inner.turn_seq, "stop requested");
        true
    }

    /// Make `model` active. Its context is created empty on first use.
    pub fn switch_model(&self, model: ModelSelection) -> UsageSnapshot {
        let snapshot = self.usage.lock().switch_model(
            model.model_id.clone(),
            model.max_tokens,
            model.model_name.clone(),
        );
        info!(model_id = %model.model_id, max_tokens = model.max_tokens, "model switched");
        self.inner.lock().model = model;
        self.emit(SessionEvent::UsageUpdated {
            usage: snapshot.clone(),
        });
        snapshot
    }

    /// Switch to another conversation and show its persisted history.
    ///
    /// Any running turn is cancelled. Usage starts from an empty tracker and
    /// is then seeded from the store's most recent model contexts; a failed
    /// read leaves the counters at zero. Seeding is skipped when another
    /// open superseded this one during the read, and never replaces a
    /// context that a turn already counted into.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
        history: Vec<Message>,
        model: ModelSelection,
    ) -> UsageSnapshot {
        let generation = {
            let mut inner = self.inner.lock();
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            inner.turn_seq += 1;
            inner.open_seq += 1;
            inner.state = SessionState::Idle;
            inner.research.reset();
            inner.conversation_id = Some(conversation_id.clone());
            inner.model = model.clone();
            *self.usage.lock() = ContextUsageTracker::new(
                model.model_id.clone(),
                model.max_tokens,
                model.model_name.clone(),
            );
            inner.open_seq
        };
        self.reconciler.lock().replace_all(history);

        let records = match self
            .store
            .recent_model_contexts(&conversation_id, self.config.usage_history_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load model contexts");
                Vec::new()
            }
        };

        let snapshot = {
            let inner = self.inner.lock();
            if inner.open_seq != generation
                || inner.conversation_id.as_ref() != Some(&conversation_id)
            {
                debug!("superseded by a later open, not restoring usage");
                return self.usage.lock().get_usage();
            }
            let mut tracker = self.usage.lock();
            let mut restored = 0;
            for record in &records {
                let (max_tokens, name) = if record.model_id == model.model_id {
                    (model.max_tokens, model.model_name.clone())
                } else {
                    (
                        self.config.default_model.max_tokens,
                        record.model_id.to_string(),
                    )
                };
                if tracker.restore_from_database(record, max_tokens, name) {
                    restored += 1;
                }
            }
            debug!(restored, skipped_live = records.len() - restored, "usage restored");
            tracker.get_usage()
        };
        self.emit(SessionEvent::UsageUpdated {
            usage: snapshot.clone(),
        });
        snapshot
    }

    /// Run one chat turn to completion, cancellation or failure.
    pub async fn send(&self, text: &str, options: TurnOptions) -> Result<TurnOutcome, SessionError> {
        let text = text.trim();
        let turn = self.begin_turn(text)?;
        let span = info_span!(
            "turn",
            turn = turn.seq,
            conversation_id = turn.conversation_id.as_ref().map(ConversationId::as_str),
            model_id = %turn.model.model_id,
        );
        self.run_turn(&turn, text, options).instrument(span).await
    }

    fn begin_turn(&self, text: &str) -> Result<TurnContext, ValidationError> {
        let mut inner = self.inner.lock();
        if text.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        if !self.config.allow_anonymous {
            if inner.user_id.is_none() {
                return Err(ValidationError::Unauthenticated);
            }
            if inner.conversation_id.is_none() {
                return Err(ValidationError::NoActiveConversation);
            }
        }

        // A new turn supersedes whatever is still streaming.
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.turn_seq += 1;
        inner.state = SessionState::Streaming;
        inner.research.reset();
        inner.input.clear();

        Ok(TurnContext {
            seq: inner.turn_seq,
            open_seq: inner.open_seq,
            conversation_id: inner.conversation_id.clone(),
            user_id: inner.user_id.clone(),
            model: inner.model.clone(),
            cancel: inner.cancel.clone(),
        })
    }

    async fn run_turn(
        &self,
        turn: &TurnContext,
        text: &str,
        options: TurnOptions,
    ) -> Result<TurnOutcome, SessionError> {
        let started = Instant::now();
        self.emit(SessionEvent::TurnStart {
            conversation_id: turn.conversation_id.clone(),
        });

        let user = Message::new(
            MessageId::temporary(),
            turn.conversation_id.clone(),
            Role::User,
            text,
        );
        let user_id = user.id.clone();
        let (index, history) = {
            let mut reconciler = self.reconciler.lock();
            let index = reconciler.insert_optimistic(user.clone());
            (index, reconciler.history())
        };
        self.emit(SessionEvent::MessageInserted {
            message_id: user_id.clone(),
            role: Role::User,
            index,
        });
        self.spawn_persist(user);

        let request = ChatRequest {
            messages: history,
            tools: augment_tools(&options.tools, options.deep_research),
            conversation_id: turn.conversation_id.clone(),
            model_id: turn.model.model_id.clone(),
            user_id: turn.user_id.clone(),
            widget_session_id: options.widget_session_id.clone(),
            enable_deep_research: options.deep_research,
            context_injection_enabled: options.context_injection,
            enable_thinking: options.thinking,
        };

        let mut state = TurnState::new();
        let mut throttle = StreamThrottle::new(self.config.throttle_interval);
        let end = self.stream_turn(turn, text, &request, &mut state, &mut throttle).await;

        match end {
            TurnEnd::Done => Ok(self.complete_turn(turn, text, state, &mut throttle, started)),
            TurnEnd::Cancelled => Ok(self.cancel_turn(turn, &state, &mut throttle)),
            TurnEnd::Failed(error) => {
                throttle.cancel();
                self.fail_turn(turn, &[user_id, state.assistant_id.clone()], &error);
                Err(error.into())
            }
        }
    }

    async fn stream_turn(
        &self,
        turn: &TurnContext,
        query: &str,
        request: &ChatRequest,
        state: &mut TurnState,
        throttle: &mut StreamThrottle,
    ) -> TurnEnd {
        let opened = tokio::select! {
            biased;
            () = turn.cancel.cancelled() => return TurnEnd::Cancelled,
            result = self.gateway.open_stream(request) => result,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return TurnEnd::Failed(e),
        };
        debug!(gateway = self.gateway.name(), "stream opened");

        let mut parser = FrameParser::new();
        loop {
            let deadline = throttle.deadline();
            tokio::select! {
                biased;
                () = turn.cancel.cancelled() => return TurnEnd::Cancelled,
                () = wait_for(deadline) => {
                    if throttle.flush_due(Instant::now()) {
                        self.apply_flush(state, false);
                    }
                }
                chunk = stream.next() => {
                    let batch = match chunk {
                        Some(Ok(bytes)) => parser.push(&bytes),
                        Some(Err(e)) => return TurnEnd::Failed(e),
                        None => {
                            debug!("stream closed without terminal marker");
                            let batch = parser.finish();
                            for event in batch.events {
                                self.dispatch(turn, query, event, state, throttle);
                            }
                            break;
                        }
                    };
                    for event in batch.events {
                        self.dispatch(turn, query, event, state, throttle);
                    }
                    if batch.done {
                        break;
                    }
                }
            }
        }
        if parser.dropped() > 0 {
            debug!(dropped = parser.dropped(), "frames dropped");
        }
        TurnEnd::Done
    }

    fn dispatch(
        &self,
        turn: &TurnContext,
        query: &str,
        event: StreamEvent,
        state: &mut TurnState,
        throttle: &mut StreamThrottle,
    ) {
        match event {
            StreamEvent::ContentDelta(delta) => {
                self.ensure_placeholder(turn, state);
                state.content.push_str(&delta.content);
                merge_citations(&mut state.citations, &delta.citations);
                merge_contexts(&mut state.contexts, &delta.contexts);
                if throttle.offer() {
                    self.apply_flush(state, false);
                }
                let update = self.inner.lock().research.observe_content(&state.content, query);
                self.emit_research(update);
            }
            StreamEvent::ToolCall(call) => {
                debug!(tool = %call.name, "tool call");
                let activity = ToolActivity {
                    call_id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                    result: None,
                };
                state.tool_activity.push(activity.clone());
                self.emit(SessionEvent::ToolActivity { activity });
            }
            StreamEvent::ToolResult(result) => {
                let activity = state.record_tool_result(result.id, result.name, result.result);
                self.emit(SessionEvent::ToolActivity { activity });
            }
            StreamEvent::ModelMetadata(metadata) => state.model_metadata = Some(metadata),
            StreamEvent::TokenUsage(usage) => state.usage = Some(usage),
            StreamEvent::ResearchProgress(progress) => {
                let update = self.inner.lock().research.observe_event(&progress, query);
                self.emit_research(update);
            }
            StreamEvent::DocSummary(summary) => {
                state.doc_summaries.push(summary.clone());
                self.emit(SessionEvent::DocSummary { summary });
            }
            StreamEvent::GraphragMetadata(graphrag) => {
                state.graphrag_tokens = state.graphrag_tokens.saturating_add(graphrag.tokens);
                merge_citations(&mut state.citations, &graphrag.citations);
                merge_contexts(&mut state.contexts, &graphrag.contexts);
            }
            StreamEvent::Done => {}
        }
    }

    fn ensure_placeholder(&self, turn: &TurnContext, state: &mut TurnState) {
        if state.placeholder_shown {
            return;
        }
        let placeholder = Message::new(
            state.assistant_id.clone(),
            turn.conversation_id.clone(),
            Role::Assistant,
            "",
        );
        let index = self.reconciler.lock().insert_placeholder(placeholder);
        state.placeholder_shown = true;
        self.emit(SessionEvent::MessageInserted {
            message_id: state.assistant_id.clone(),
            role: Role::Assistant,
            index,
        });
    }

    fn apply_flush(&self, state: &TurnState, is_final: bool) {
        let applied = self.reconciler.lock().update_content(
            &state.assistant_id,
            &state.content,
            &state.citations,
            &state.contexts,
        );
        if !applied && !is_final {
            debug!(message_id = %state.assistant_id, "flush for an entry that is no longer streaming");
            return;
        }
        self.emit(SessionEvent::ContentFlushed {
            message_id: state.assistant_id.clone(),
            content: state.content.clone(),
            citations: state.citations.clone(),
            contexts_used: state.contexts.clone(),
            is_final,
        });
    }

    fn complete_turn(
        &self,
        turn: &TurnContext,
        text: &str,
        mut state: TurnState,
        throttle: &mut StreamThrottle,
        started: Instant,
    ) -> TurnOutcome {
        // The final flush commits the full accumulated state, pending or not.
        let _ = throttle.finish();
        self.ensure_placeholder(turn, &mut state);
        self.apply_flush(&state, true);

        let latency = started.elapsed();
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let mut metadata = state.model_metadata.take().unwrap_or_default();
        metadata.latency_ms = Some(latency_ms);
        if metadata.model_id.is_none() {
            metadata.model_id = Some(turn.model.model_id.to_string());
        }
        if metadata.model_name.is_none() {
            metadata.model_name = Some(turn.model.model_name.clone());
        }

        let (input_tokens, output_tokens) = match &state.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (estimate_text_tokens(text), estimate_text_tokens(&state.content)),
        };

        let tool_calls = state.tool_activity.len();
        let completed = {
            let mut reconciler = self.reconciler.lock();
            let tool_activity = std::mem::take(&mut state.tool_activity);
            let _ = reconciler.update(&state.assistant_id, |message| {
                message.model_metadata = Some(metadata);
                message.input_tokens = Some(input_tokens);
                message.output_tokens = Some(output_tokens);
                message.tool_activity = tool_activity;
            });
            let _ = reconciler.mark_completed(&state.assistant_id);
            reconciler.get(&state.assistant_id).map(|e| e.message.clone())
        };

        if let Some(usage) = &state.usage {
            self.record_usage(turn, usage, state.graphrag_tokens);
        } else {
            debug!(input_tokens, output_tokens, "no usage reported, storing estimates");
        }

        match completed {
            Some(message) => self.spawn_persist(message),
            None => debug!(message_id = %state.assistant_id, "assistant entry gone before completion"),
        }

        info!(
            message_id = %state.assistant_id,
            latency_ms,
            chars = state.content.len(),
            tool_calls,
            doc_summaries = state.doc_summaries.len(),
            "turn complete"
        );
        self.emit(SessionEvent::TurnComplete {
            message_id: state.assistant_id.clone(),
            latency_ms,
        });
        self.end_turn(turn.seq);

        TurnOutcome::Completed {
            message_id: state.assistant_id,
            content: state.content,
            latency,
        }
    }

    fn record_usage(&self, turn: &TurnContext, usage: &TokenUsage, graphrag_tokens: u64) {
        let (snapshot, record) = {
            let inner = self.inner.lock();
            if inner.open_seq != turn.open_seq {
                debug!("conversation changed before usage arrived, not counting");
                return;
            }
            let mut tracker = self.usage.lock();
            let snapshot =
                tracker.add_message(usage.input_tokens, usage.output_tokens, graphrag_tokens);
            let active = tracker.active_model().clone();
            let record = turn
                .conversation_id
                .clone()
                .and_then(|conversation_id| tracker.record_for(conversation_id, &active));
            (snapshot, record)
        };
        self.emit(SessionEvent::UsageUpdated { usage: snapshot });
        if let Some(record) = record {
            self.spawn_usage_upsert(record);
        }
    }

    fn cancel_turn(
        &self,
        turn: &TurnContext,
        state: &TurnState,
        throttle: &mut StreamThrottle,
    ) -> TurnOutcome {
        throttle.cancel();
        if self.reconciler.lock().rollback(&state.assistant_id).is_some() {
            self.emit(SessionEvent::MessageRemoved {
                message_id: state.assistant_id.clone(),
            });
        }
        info!(partial_chars = state.content.len(), "turn cancelled");
        self.emit(SessionEvent::TurnCancelled);
        self.end_turn(turn.seq);
        TurnOutcome::Cancelled
    }

    fn fail_turn(&self, turn: &TurnContext, ids: &[MessageId], error: &TransportError) {
        let mut removed = Vec::new();
        {
            let mut reconciler = self.reconciler.lock();
            for id in ids {
                // Already persisted entries stay.
                if !reconciler.get(id).is_some_and(|e| e.is_temporary()) {
                    continue;
                }
                if reconciler.rollback(id).is_some() {
                    removed.push(id.clone());
                }
            }
        }
        for message_id in removed {
            self.emit(SessionEvent::MessageRemoved { message_id });
        }
        warn!(
            error = %error,
            kind = error.error_kind(),
            retryable = error.is_retryable(),
            "turn failed"
        );
        self.emit(SessionEvent::TurnFailed {
            error: error.to_string(),
        });
        self.end_turn(turn.seq);
    }

    fn end_turn(&self, seq: u64) {
        let mut inner = self.inner.lock();
        if inner.turn_seq == seq {
            inner.state = SessionState::Idle;
        }
    }

    fn emit_research(&self, update: Option<ResearchUpdate>) {
        match update {
            Some(ResearchUpdate::Activated { job, progress, .. }) => {
                self.emit(SessionEvent::ResearchActivated { job, progress });
            }
            Some(ResearchUpdate::Progress(progress)) => {
                self.emit(SessionEvent::ResearchProgress { progress });
            }
            None => {}
        }
    }

    /// Write `message` in the background and swap in the durable id.
    fn spawn_persist(&self, message: Message) {
        let Some(conversation_id) = message.conversation_id.clone() else {
            debug!(message_id = %message.id, "no conversation, not persisting");
            return;
        };
        let store = Arc::clone(&self.store);
        let reconciler = Arc::clone(&self.reconciler);
        let events = self.events.clone();
        drop(tokio::spawn(
            async move {
                let temporary_id = message.id.clone();
                match store.insert_message(&message).await {
                    Ok(durable_id) => {
                        if reconciler.lock().confirm(&temporary_id, durable_id.clone()) {
                            let _ = events.send(SessionEvent::MessageIdSwapped {
                                temporary_id,
                                durable_id,
                            });
                        } else {
                            debug!(message_id = %temporary_id, durable_id = %durable_id, "entry gone, id swap skipped");
                        }
                    }
                    Err(e) => warn!(
                        conversation_id = %conversation_id,
                        message_id = %temporary_id,
                        error = %e,
                        "failed to persist message"
                    ),
                }
            }
            .in_current_span(),
        ));
    }

    fn spawn_usage_upsert(&self, record: ModelContextRecord) {
        let store = Arc::clone(&self.store);
        drop(tokio::spawn(
            async move {
                if let Err(e) = store.upsert_model_context(&record).await {
                    warn!(
                        conversation_id = %record.conversation_id,
                        model_id = %record.model_id,
                        error = %e,
                        "failed to persist model context"
                    );
                }
            }
            .in_current_span(),
        ));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
