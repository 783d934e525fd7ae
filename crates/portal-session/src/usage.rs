use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use portal_core::ids::{ConversationId, ModelId};
use portal_core::tokens::{ModelContext, ModelContextRecord, UsageSnapshot};

/// Per-model token ledgers for one conversation.
///
/// Only the active model's context is reported by [`get_usage`]; the others
/// stay available through [`usage_for`].
///
/// [`get_usage`]: ContextUsageTracker::get_usage
/// [`usage_for`]: ContextUsageTracker::usage_for
#[derive(Clone, Debug)]
pub struct ContextUsageTracker {
    contexts: HashMap<ModelId, ModelContext>,
    active: ModelId,
    /// Models that received an `add_message` since this tracker was built.
    live: HashSet<ModelId>,
}

impl ContextUsageTracker {
    pub fn new(model_id: ModelId, max_tokens: u64, model_name: impl Into<String>) -> Self {
        let mut contexts = HashMap::new();
        let _ = contexts.insert(
            model_id.clone(),
            ModelContext::empty(model_id.clone(), max_tokens, model_name),
        );
        Self {
            contexts,
            active: model_id,
            live: HashSet::new(),
        }
    }

    pub fn active_model(&self) -> &ModelId {
        &self.active
    }

    /// Fold one authoritative exchange into the active context.
    pub fn add_message(&mut self, input: u64, output: u64, graphrag: u64) -> UsageSnapshot {
        self.add_message_at(input, output, graphrag, Utc::now())
    }

    pub fn add_message_at(
        &mut self,
        input: u64,
        output: u64,
        graphrag: u64,
        at: DateTime<Utc>,
    ) -> UsageSnapshot {
        let _ = self.live.insert(self.active.clone());
        let ctx = self.active_context_mut();
        ctx.record(input, output, graphrag, at);
        ctx.snapshot()
    }

    /// Make `model_id` active, creating an empty context on first use.
    /// Existing contexts keep their counts; capacity and name follow the
    /// latest selection.
    pub fn switch_model(
        &mut self,
        model_id: ModelId,
        max_tokens: u64,
        model_name: impl Into<String>,
    ) -> UsageSnapshot {
        let model_name = model_name.into();
        let ctx = self
            .contexts
            .entry(model_id.clone())
            .or_insert_with(|| ModelContext::empty(model_id.clone(), max_tokens, model_name.clone()));
        ctx.max_tokens = max_tokens;
        ctx.model_name = model_name;
        let snapshot = ctx.snapshot();
        self.active = model_id;
        snapshot
    }

    /// Seed a context from storage. Returns false, leaving the context as
    /// is, when that model already saw live updates.
    pub fn restore_from_database(
        &mut self,
        record: &ModelContextRecord,
        max_tokens: u64,
        model_name: impl Into<String>,
    ) -> bool {
        if self.live.contains(&record.model_id) {
            return false;
        }
        let mut ctx = ModelContext::empty(record.model_id.clone(), max_tokens, model_name);
        ctx.input_tokens = record.input_tokens;
        ctx.output_tokens = record.output_tokens;
        ctx.graphrag_tokens = record.graphrag_tokens;
        ctx.total_tokens = record.total_tokens;
        ctx.message_count = record.message_count;
        ctx.first_message_at = record.first_message_at;
        ctx.last_message_at = record.last_message_at;
        let _ = self.contexts.insert(record.model_id.clone(), ctx);
        true
    }

    /// Usage of the active model only.
    pub fn get_usage(&self) -> UsageSnapshot {
        self.active_context().snapshot()
    }

    pub fn usage_for(&self, model_id: &ModelId) -> Option<UsageSnapshot> {
        self.contexts.get(model_id).map(ModelContext::snapshot)
    }

    /// All known contexts, ordered by model id.
    pub fn contexts(&self) -> Vec<UsageSnapshot> {
        let mut out: Vec<_> = self.contexts.values().map(ModelContext::snapshot).collect();
        out.sort_by(|a, b| a.model_id.as_str().cmp(b.model_id.as_str()));
        out
    }

    pub fn record_for(
        &self,
        conversation_id: ConversationId,
        model_id: &ModelId,
    ) -> Option<ModelContextRecord> {
        self.contexts
            .get(model_id)
            .map(|ctx| ModelContextRecord::from_context(conversation_id, ctx))
    }

    fn active_context(&self) -> &ModelContext {
        // `active` always has an entry: set in `new`, inserted by `switch_model`.
        &self.contexts[&self.active]
    }

    fn active_context_mut(&mut self) -> &mut ModelContext {
        let active = self.active.clone();
        self.contexts
            .entry(active.clone())
            .or_insert_with(|| ModelContext::empty(active, 0, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelId {
        ModelId::from_raw(id)
    }

    #[test]
    fn add_message_is_monotonic() {
        let mut tracker = ContextUsageTracker::new(model("a"), 8000, "A");
        let mut last = 0;
        for (input, output, graphrag) in [(100, 20, 0), (0, 0, 0), (50, 5, 30), (1, 1, 1)] {
            let snap = tracker.add_message(input, output, graphrag);
            assert!(snap.total_tokens >= last);
            last = snap.total_tokens;
        }
        assert_eq!(last, 208);
        assert_eq!(tracker.get_usage().message_count, 4);
    }

    #[test]
    fn switch_model_keeps_previous_context() {
        let mut tracker = ContextUsageTracker::new(model("modelA"), 8000, "Model A");
        let _ = tracker.add_message(3000, 1000, 0);
        let before = tracker.get_usage();
        assert_eq!(before.model_id, model("modelA"));
        assert_eq!(before.total_tokens, 4000);

        let after = tracker.switch_model(model("modelB"), 128_000, "Model B");
        assert_eq!(after.total_tokens, 0);
        assert_eq!(after.max_tokens, 128_000);
        assert_eq!(tracker.get_usage().model_id, model("modelB"));

        let a = tracker.usage_for(&model("modelA")).unwrap();
        assert_eq!(a.total_tokens, 4000);
        assert_eq!(a.max_tokens, 8000);

        let back = tracker.switch_model(model("modelA"), 8000, "Model A");
        assert_eq!(back.total_tokens, 4000);
        assert_eq!(tracker.contexts().len(), 2);
    }

    #[test]
    fn restore_seeds_untouched_context() {
        let mut tracker = ContextUsageTracker::new(model("a"), 8000, "A");
        let record = ModelContextRecord {
            conversation_id: ConversationId::from_raw("conv_1"),
            model_id: model("a"),
            input_tokens: 600,
            output_tokens: 400,
            graphrag_tokens: 0,
            total_tokens: 1000,
            message_count: 2,
            first_message_at: None,
            last_message_at: None,
        };
        assert!(tracker.restore_from_database(&record, 8000, "A"));
        assert_eq!(tracker.get_usage().total_tokens, 1000);

        let snap = tracker.add_message(10, 10, 0);
        assert_eq!(snap.total_tokens, 1020);
    }

    #[test]
    fn restore_never_overwrites_live_context() {
        let mut tracker = ContextUsageTracker::new(model("a"), 8000, "A");
        let _ = tracker.add_message(5, 5, 0);
        let record = ModelContextRecord {
            conversation_id: ConversationId::from_raw("conv_1"),
            model_id: model("a"),
            input_tokens: 1,
            output_tokens: 1,
            graphrag_tokens: 0,
            total_tokens: 2,
            message_count: 1,
            first_message_at: None,
            last_message_at: None,
        };
        assert!(!tracker.restore_from_database(&record, 8000, "A"));
        assert_eq!(tracker.get_usage().total_tokens, 10);
    }

    #[test]
    fn record_for_reflects_counts() {
        let mut tracker = ContextUsageTracker::new(model("a"), 8000, "A");
        let _ = tracker.add_message(12, 1, 0);
        let record = tracker
            .record_for(ConversationId::from_raw("conv_1"), &model("a"))
            .unwrap();
        assert_eq!(record.total_tokens, 13);
        assert_eq!(record.message_count, 1);
        assert!(record.last_message_at.is_some());
        assert!(tracker.record_for(ConversationId::from_raw("conv_1"), &model("zzz")).is_none());
    }
}
