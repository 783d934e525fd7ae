use serde::{Deserialize, Serialize};

use crate::messages::{Citation, ContextUsed, ModelMetadata};
use crate::tokens::TokenUsage;

/// Typed frames decoded from the gateway's event stream.
///
/// Frames arrive in any order; only `Done` is terminal. None of these are
/// persisted as-is, only their effects on the turn.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    ContentDelta(ContentDelta),
    ToolCall(ToolCallFrame),
    ToolResult(ToolResultFrame),
    ModelMetadata(ModelMetadata),
    TokenUsage(TokenUsage),
    ResearchProgress(ResearchProgress),
    DocSummary(DocSummary),
    GraphragMetadata(GraphragMetadata),
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContentDelta(_) => "content_delta",
            Self::ToolCall(_) => "tool_call",
            Self::ToolResult(_) => "tool_result",
            Self::ModelMetadata(_) => "model_metadata",
            Self::TokenUsage(_) => "token_usage",
            Self::ResearchProgress(_) => "research_progress",
            Self::DocSummary(_) => "doc_summary",
            Self::GraphragMetadata(_) => "graphrag_metadata",
            Self::Done => "done",
        }
    }
}

/// A plain content frame: `{"content": "...", "citations": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDelta {
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, alias = "contextsUsed")]
    pub contexts: Vec<ContextUsed>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFrame {
    #[serde(default, alias = "toolCallId", alias = "tool_call_id")]
    pub id: Option<String>,
    #[serde(alias = "toolName", alias = "tool_name")]
    pub name: String,
    #[serde(default, alias = "args", alias = "input")]
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultFrame {
    #[serde(default, alias = "toolCallId", alias = "tool_call_id")]
    pub id: Option<String>,
    #[serde(default, alias = "toolName", alias = "tool_name")]
    pub name: Option<String>,
    #[serde(default, alias = "output")]
    pub result: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Started,
    #[serde(alias = "progress", alias = "running")]
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchProgress {
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
    pub status: ResearchStatus,
    #[serde(default, alias = "currentStep")]
    pub step: Option<u32>,
    #[serde(default, alias = "totalSteps")]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocSummary {
    #[serde(default, alias = "documentId")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub summary: String,
}

/// Retrieval metadata for knowledge-graph augmented prompts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphragMetadata {
    #[serde(default, alias = "graphragTokens", alias = "graphrag_tokens")]
    pub tokens: u64,
    #[serde(default, alias = "contextsUsed")]
    pub contexts: Vec<ContextUsed>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Done.is_terminal());
        let delta = StreamEvent::ContentDelta(ContentDelta {
            content: "x".into(),
            ..Default::default()
        });
        assert!(!delta.is_terminal());
        assert_eq!(delta.kind(), "content_delta");
    }

    #[test]
    fn research_status_accepts_unknown_values() {
        let p: ResearchProgress =
            serde_json::from_str(r#"{"status":"queued","jobId":"j1"}"#).unwrap();
        assert_eq!(p.status, ResearchStatus::Unknown);
        assert_eq!(p.job_id.as_deref(), Some("j1"));
    }

    #[test]
    fn research_progress_camel_case_aliases() {
        let p: ResearchProgress = serde_json::from_str(
            r#"{"status":"progress","jobId":"j1","currentStep":2,"totalSteps":5}"#,
        )
        .unwrap();
        assert_eq!(p.status, ResearchStatus::InProgress);
        assert_eq!(p.step, Some(2));
        assert_eq!(p.total_steps, Some(5));
    }

    #[test]
    fn tool_call_aliases() {
        let frame: ToolCallFrame =
            serde_json::from_str(r#"{"toolCallId":"c1","toolName":"web_search","args":{"q":"rust"}}"#)
                .unwrap();
        assert_eq!(frame.id.as_deref(), Some("c1"));
        assert_eq!(frame.name, "web_search");
        assert_eq!(frame.arguments["q"], "rust");
    }
}
