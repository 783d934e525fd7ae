use rusqlite::params;
use tracing::instrument;

use portal_core::ids::{ConversationId, MessageId};
use portal_core::messages::{Message, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self as rh, json_list};

const TABLE: &str = "messages";

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, role, content, created_at, citations,
        contexts_used, input_tokens, output_tokens, model_metadata, tool_activity
 FROM messages";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store `message` under a freshly issued durable id and return it.
    #[instrument(skip(self, message), fields(temporary_id = %message.id, role = %message.role))]
    pub fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        let id = MessageId::new();
        let citations = json_list(&message.citations)?;
        let contexts = json_list(&message.contexts_used)?;
        let tools = json_list(&message.tool_activity)?;
        let metadata = message
            .model_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at, citations,
                    contexts_used, input_tokens, output_tokens, model_metadata, tool_activity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.as_str(),
                    message.conversation_id.as_ref().map(ConversationId::as_str),
                    message.role.as_str(),
                    message.content,
                    rh::format_time(&message.created_at),
                    citations,
                    contexts,
                    message.input_tokens.map(rh::to_i64),
                    message.output_tokens.map(rh::to_i64),
                    metadata,
                    tools,
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Oldest first, as displayed.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query([conversation_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role: String = rh::get(row, 2, TABLE, "role")?;
    let created_at: String = rh::get(row, 4, TABLE, "created_at")?;
    let metadata: Option<String> = rh::get(row, 9, TABLE, "model_metadata")?;
    let model_metadata = metadata
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StoreError::CorruptRow {
                table: TABLE,
                column: "model_metadata",
                detail: e.to_string(),
            })
        })
        .transpose()?;

    Ok(Message {
        id: MessageId::from_raw(rh::get::<String>(row, 0, TABLE, "id")?),
        conversation_id: rh::get::<Option<String>>(row, 1, TABLE, "conversation_id")?
            .map(ConversationId::from_raw),
        role: rh::parse_enum::<Role>(&role, TABLE, "role")?,
        content: rh::get(row, 3, TABLE, "content")?,
        created_at: rh::parse_time(&created_at, TABLE, "created_at")?,
        citations: rh::parse_json_or_default(rh::get(row, 5, TABLE, "citations")?, TABLE, "citations")?,
        contexts_used: rh::parse_json_or_default(
            rh::get(row, 6, TABLE, "contexts_used")?,
            TABLE,
            "contexts_used",
        )?,
        input_tokens: rh::get::<Option<i64>>(row, 7, TABLE, "input_tokens")?.map(rh::to_u64),
        output_tokens: rh::get::<Option<i64>>(row, 8, TABLE, "output_tokens")?.map(rh::to_u64),
        model_metadata,
        tool_activity: rh::parse_json_or_default(
            rh::get(row, 10, TABLE, "tool_activity")?,
            TABLE,
            "tool_activity",
        )?,
    })
}
