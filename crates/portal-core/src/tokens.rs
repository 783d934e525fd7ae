use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ModelId};

/// Token counts reported by the backend for one response. Authoritative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "inputTokens", alias = "prompt_tokens", alias = "promptTokens")]
    pub input_tokens: u64,
    #[serde(
        default,
        alias = "outputTokens",
        alias = "completion_tokens",
        alias = "completionTokens"
    )]
    pub output_tokens: u64,
}

/// Estimate token count for text content.
/// Approximation: chars / 4, rounded up. Only used where no real count exists.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Token ledger for one (conversation, model) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContext {
    pub model_id: ModelId,
    pub model_name: String,
    pub max_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub graphrag_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ModelContext {
    pub fn empty(model_id: ModelId, max_tokens: u64, model_name: impl Into<String>) -> Self {
        Self {
            model_id,
            model_name: model_name.into(),
            max_tokens,
            input_tokens: 0,
            output_tokens: 0,
            graphrag_tokens: 0,
            total_tokens: 0,
            message_count: 0,
            first_message_at: None,
            last_message_at: None,
        }
    }

    /// Fold one exchange into the ledger. Counts only ever grow.
    pub fn record(&mut self, input: u64, output: u64, graphrag: u64, at: DateTime<Utc>) {
        self.input_tokens = self.input_tokens.saturating_add(input);
        self.output_tokens = self.output_tokens.saturating_add(output);
        self.graphrag_tokens = self.graphrag_tokens.saturating_add(graphrag);
        self.total_tokens = self
            .total_tokens
            .saturating_add(input)
            .saturating_add(output)
            .saturating_add(graphrag);
        self.message_count = self.message_count.saturating_add(1);
        self.first_message_at.get_or_insert(at);
        self.last_message_at = Some(at);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            model_id: self.model_id.clone(),
            model_name: self.model_name.clone(),
            max_tokens: self.max_tokens,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            graphrag_tokens: self.graphrag_tokens,
            total_tokens: self.total_tokens,
            message_count: self.message_count,
            percent_used: percent(self.total_tokens, self.max_tokens),
            threshold: ThresholdLevel::from_usage(self.total_tokens, self.max_tokens),
        }
    }
}

/// Persisted form of a [`ModelContext`], keyed by (conversation, model).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContextRecord {
    pub conversation_id: ConversationId,
    pub model_id: ModelId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub graphrag_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ModelContextRecord {
    pub fn from_context(conversation_id: ConversationId, ctx: &ModelContext) -> Self {
        Self {
            conversation_id,
            model_id: ctx.model_id.clone(),
            input_tokens: ctx.input_tokens,
            output_tokens: ctx.output_tokens,
            graphrag_tokens: ctx.graphrag_tokens,
            total_tokens: ctx.total_tokens,
            message_count: ctx.message_count,
            first_message_at: ctx.first_message_at,
            last_message_at: ctx.last_message_at,
        }
    }
}

/// Read-only usage view for one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub model_id: ModelId,
    pub model_name: String,
    pub max_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub graphrag_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub percent_used: f64,
    pub threshold: ThresholdLevel,
}

/// Context usage threshold levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLevel {
    Normal,   // 0-50%
    Warning,  // 50-70%
    Alert,    // 70-85%
    Critical, // 85-95%
    Exceeded, // 95%+
}

impl ThresholdLevel {
    pub fn from_usage(used: u64, total: u64) -> Self {
        if total == 0 {
            return Self::Exceeded;
        }
        let pct = percent(used, total);
        if pct >= 95.0 {
            Self::Exceeded
        } else if pct >= 85.0 {
            Self::Critical
        } else if pct >= 70.0 {
            Self::Alert
        } else if pct >= 50.0 {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (used as f64 / total as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_token_estimation_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("4"), 1);
        assert_eq!(estimate_text_tokens("hello world"), 3); // 11 chars
        assert_eq!(estimate_text_tokens(&"a".repeat(400)), 100);
    }

    #[test]
    fn estimation_counts_chars_not_bytes() {
        assert_eq!(estimate_text_tokens("héllo"), 2);
    }

    #[test]
    fn record_accumulates_and_stamps_times() {
        let mut ctx = ModelContext::empty(ModelId::from_raw("m"), 8000, "Model");
        let t1 = Utc::now();
        ctx.record(100, 50, 10, t1);
        let t2 = t1 + chrono::Duration::seconds(5);
        ctx.record(20, 5, 0, t2);
        assert_eq!(ctx.input_tokens, 120);
        assert_eq!(ctx.output_tokens, 55);
        assert_eq!(ctx.graphrag_tokens, 10);
        assert_eq!(ctx.total_tokens, 185);
        assert_eq!(ctx.message_count, 2);
        assert_eq!(ctx.first_message_at, Some(t1));
        assert_eq!(ctx.last_message_at, Some(t2));
    }

    #[test]
    fn snapshot_reports_threshold() {
        let mut ctx = ModelContext::empty(ModelId::from_raw("m"), 8000, "Model");
        ctx.record(3000, 1000, 0, Utc::now());
        let snap = ctx.snapshot();
        assert_eq!(snap.total_tokens, 4000);
        assert!((snap.percent_used - 50.0).abs() < f64::EPSILON);
        assert_eq!(snap.threshold, ThresholdLevel::Warning);
    }

    #[test]
    fn threshold_levels() {
        assert_eq!(ThresholdLevel::from_usage(0, 200_000), ThresholdLevel::Normal);
        assert_eq!(ThresholdLevel::from_usage(140_000, 200_000), ThresholdLevel::Alert);
        assert_eq!(ThresholdLevel::from_usage(170_000, 200_000), ThresholdLevel::Critical);
        assert_eq!(ThresholdLevel::from_usage(195_000, 200_000), ThresholdLevel::Exceeded);
        assert_eq!(ThresholdLevel::from_usage(0, 0), ThresholdLevel::Exceeded);
    }

    #[test]
    fn usage_accepts_openai_style_names() {
        let usage: TokenUsage =
            serde_json::from_str(r#"{"prompt_tokens": 12, "completion_tokens": 3}"#).unwrap();
        assert_eq!(usage, TokenUsage { input_tokens: 12, output_tokens: 3 });
    }
}
