use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use portal_core::errors::PersistenceError;
use portal_core::ids::{ConversationId, MessageId};
use portal_core::messages::Message;
use portal_core::store::ConversationStore;
use portal_core::tokens::ModelContextRecord;

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::model_contexts::ModelContextRepo;

/// [`ConversationStore`] over SQLite. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteConversationStore {
    messages: Arc<MessageRepo>,
    contexts: Arc<ModelContextRepo>,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            messages: Arc::new(MessageRepo::new(db.clone())),
            contexts: Arc::new(ModelContextRepo::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    /// Persisted history of a conversation, oldest first.
    pub async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let repo = self.messages.clone();
        let conversation_id = conversation_id.clone();
        blocking(move || repo.list_for_conversation(&conversation_id)).await
    }
}

async fn blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn insert_message(&self, message: &Message) -> Result<MessageId, PersistenceError> {
        let repo = self.messages.clone();
        let message = message.clone();
        Ok(blocking(move || repo.insert(&message)).await?)
    }

    async fn upsert_model_context(
        &self,
        record: &ModelContextRecord,
    ) -> Result<(), PersistenceError> {
        let repo = self.contexts.clone();
        let record = record.clone();
        Ok(blocking(move || repo.upsert(&record)).await?)
    }

    async fn recent_model_contexts(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ModelContextRecord>, PersistenceError> {
        let repo = self.contexts.clone();
        let conversation_id = conversation_id.clone();
        Ok(blocking(move || repo.recent(&conversation_id, limit)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use portal_core::ids::ModelId;
    use portal_core::messages::Role;
    use portal_core::tokens::ModelContext;

    #[tokio::test]
    async fn insert_then_read_history() {
        let store = SqliteConversationStore::in_memory().unwrap();
        let conv = ConversationId::from_raw("conv_1");
        let user = Message::new(MessageId::temporary(), Some(conv.clone()), Role::User, "What is 2+2?");
        let assistant = Message::new(MessageId::temporary(), Some(conv.clone()), Role::Assistant, "4");

        let user_id = store.insert_message(&user).await.unwrap();
        let assistant_id = store.insert_message(&assistant).await.unwrap();

        let history = store.conversation_history(&conv).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![user_id, assistant_id]);
    }

    #[tokio::test]
    async fn upsert_and_restore_model_contexts() {
        let store = SqliteConversationStore::in_memory().unwrap();
        let conv = ConversationId::from_raw("conv_1");
        let mut ctx = ModelContext::empty(ModelId::from_raw("model_a"), 8000, "A");
        ctx.record(1000, 500, 0, Utc::now());
        store
            .upsert_model_context(&ModelContextRecord::from_context(conv.clone(), &ctx))
            .await
            .unwrap();

        let rows = store.recent_model_contexts(&conv, 25).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tokens, 1500);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.db");
        let conv = ConversationId::from_raw("conv_9");
        {
            let store = SqliteConversationStore::open(&path).unwrap();
            let msg = Message::new(MessageId::temporary(), Some(conv.clone()), Role::User, "hi");
            let _ = store.insert_message(&msg).await.unwrap();
        }
        let reopened = SqliteConversationStore::open(&path).unwrap();
        assert_eq!(reopened.conversation_history(&conv).await.unwrap().len(), 1);
    }
}
