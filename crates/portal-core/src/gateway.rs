use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::ids::{ConversationId, ModelId, UserId};
use crate::messages::ChatMessage;
use crate::tools::ToolDefinition;

/// Raw response body chunks, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Body of `POST /chat`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub conversation_id: Option<ConversationId>,
    pub model_id: ModelId,
    pub user_id: Option<UserId>,
    pub widget_session_id: Option<String>,
    pub enable_deep_research: bool,
    pub context_injection_enabled: bool,
    pub enable_thinking: bool,
}

/// The inference gateway. Implementations return the open body stream;
/// decoding frames is the caller's job.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn request_uses_camel_case_keys() {
        let req = ChatRequest {
            messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
            tools: Vec::new(),
            conversation_id: Some(ConversationId::from_raw("c1")),
            model_id: ModelId::from_raw("m1"),
            user_id: None,
            widget_session_id: None,
            enable_deep_research: true,
            context_injection_enabled: false,
            enable_thinking: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["modelId"], "m1");
        assert_eq!(json["enableDeepResearch"], true);
        assert_eq!(json["contextInjectionEnabled"], false);
        assert!(json["userId"].is_null());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
