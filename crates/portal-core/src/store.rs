use async_trait::async_trait;

use crate::errors::PersistenceError;
use crate::ids::{ConversationId, MessageId};
use crate::messages::Message;
use crate::tokens::ModelContextRecord;

/// Durable storage for messages and per-model usage. Schema ownership lives
/// with the implementation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Store a message and return its durable id. The message's own id is
    /// temporary and must not be reused.
    async fn insert_message(&self, message: &Message) -> Result<MessageId, PersistenceError>;

    /// Insert or replace the record for `(conversation_id, model_id)`.
    async fn upsert_model_context(&self, record: &ModelContextRecord)
        -> Result<(), PersistenceError>;

    /// Most recently used model contexts first.
    async fn recent_model_contexts(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ModelContextRecord>, PersistenceError>;
}
