use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};
use crate::messages::{Citation, ContextUsed, Role, ToolActivity};
use crate::research::{ActiveResearchJob, LegacyResearchProgress};
use crate::stream::DocSummary;
use crate::tokens::UsageSnapshot;

/// Notifications for whatever renders the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TurnStart {
        conversation_id: Option<ConversationId>,
    },
    MessageInserted {
        message_id: MessageId,
        role: Role,
        index: usize,
    },
    /// A throttled (or final) commit of accumulated assistant content.
    ContentFlushed {
        message_id: MessageId,
        content: String,
        citations: Vec<Citation>,
        contexts_used: Vec<ContextUsed>,
        is_final: bool,
    },
    MessageIdSwapped {
        temporary_id: MessageId,
        durable_id: MessageId,
    },
    MessageRemoved {
        message_id: MessageId,
    },
    UsageUpdated {
        usage: UsageSnapshot,
    },
    ResearchActivated {
        job: ActiveResearchJob,
        progress: LegacyResearchProgress,
    },
    ResearchProgress {
        progress: LegacyResearchProgress,
    },
    ToolActivity {
        activity: ToolActivity,
    },
    DocSummary {
        summary: DocSummary,
    },
    TurnComplete {
        message_id: MessageId,
        latency_ms: u64,
    },
    TurnFailed {
        error: String,
    },
    TurnCancelled,
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::MessageInserted { .. } => "message_inserted",
            Self::ContentFlushed { .. } => "content_flushed",
            Self::MessageIdSwapped { .. } => "message_id_swapped",
            Self::MessageRemoved { .. } => "message_removed",
            Self::UsageUpdated { .. } => "usage_updated",
            Self::ResearchActivated { .. } => "research_activated",
            Self::ResearchProgress { .. } => "research_progress",
            Self::ToolActivity { .. } => "tool_activity",
            Self::DocSummary { .. } => "doc_summary",
            Self::TurnComplete { .. } => "turn_complete",
            Self::TurnFailed { .. } => "turn_failed",
            Self::TurnCancelled => "turn_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_event_type() {
        let events = vec![
            SessionEvent::TurnCancelled,
            SessionEvent::TurnFailed { error: "boom".into() },
            SessionEvent::MessageRemoved { message_id: MessageId::temporary() },
        ];
        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }
}
