use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One chat message as displayed and persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// `None` only for anonymous sessions that never opened a conversation.
    pub conversation_id: Option<ConversationId>,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts_used: Vec<ContextUsed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metadata: Option<ModelMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_activity: Vec<ToolActivity>,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: Option<ConversationId>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            citations: Vec::new(),
            contexts_used: Vec::new(),
            input_tokens: None,
            output_tokens: None,
            model_metadata: None,
            tool_activity: Vec::new(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// The `{role, content}` pair sent to the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Citation {
    /// Two citations with the same url and title refer to the same source.
    pub fn same_source(&self, other: &Citation) -> bool {
        self.url == other.url && self.title == other.title
    }
}

/// A knowledge-base passage that was injected into the prompt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ContextUsed {
    pub fn same_passage(&self, other: &ContextUsed) -> bool {
        self.document_id == other.document_id && self.content == other.content
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Time from request issuance to the terminal frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// A tool invocation reported by the backend during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolActivity {
    pub call_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Merge `incoming` into `target`, skipping sources already present.
pub fn merge_citations(target: &mut Vec<Citation>, incoming: &[Citation]) {
    for citation in incoming {
        if !target.iter().any(|c| c.same_source(citation)) {
            target.push(citation.clone());
        }
    }
}

pub fn merge_contexts(target: &mut Vec<ContextUsed>, incoming: &[ContextUsed]) {
    for ctx in incoming {
        if !target.iter().any(|c| c.same_passage(ctx)) {
            target.push(ctx.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(url: &str) -> Citation {
        Citation {
            url: Some(url.into()),
            title: Some(format!("title for {url}")),
            ..Default::default()
        }
    }

    #[test]
    fn message_serializes_camel_case() {
        let mut msg = Message::new(MessageId::from_raw("m1"), None, Role::Assistant, "hi");
        msg.input_tokens = Some(12);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["inputTokens"], 12);
        assert!(json.get("citations").is_none());
        assert!(json.get("outputTokens").is_none());
    }

    #[test]
    fn chat_message_is_role_and_content_only() {
        let msg = Message::new(MessageId::temporary(), None, Role::User, "What is 2+2?");
        let json = serde_json::to_value(msg.to_chat()).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "What is 2+2?"}));
    }

    #[test]
    fn merge_citations_skips_duplicates() {
        let mut target = vec![cite("a")];
        merge_citations(&mut target, &[cite("a"), cite("b")]);
        merge_citations(&mut target, &[cite("b"), cite("c")]);
        let urls: Vec<_> = target.iter().filter_map(|c| c.url.as_deref()).collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_contexts_keeps_distinct_passages() {
        let a = ContextUsed {
            document_id: Some("doc".into()),
            content: Some("one".into()),
            ..Default::default()
        };
        let b = ContextUsed {
            document_id: Some("doc".into()),
            content: Some("two".into()),
            ..Default::default()
        };
        let mut target = vec![a.clone()];
        merge_contexts(&mut target, &[a, b]);
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn role_parse_roundtrip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }
}
