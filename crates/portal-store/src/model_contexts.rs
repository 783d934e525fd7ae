use rusqlite::params;
use tracing::instrument;

use portal_core::ids::{ConversationId, ModelId};
use portal_core::tokens::ModelContextRecord;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers as rh;

const TABLE: &str = "model_contexts";

pub struct ModelContextRepo {
    db: Database,
}

impl ModelContextRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the row for `(conversation_id, model_id)`.
    #[instrument(skip(self, record), fields(conversation_id = %record.conversation_id, model_id = %record.model_id))]
    pub fn upsert(&self, record: &ModelContextRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO model_contexts (conversation_id, model_id, input_tokens, output_tokens,
                    graphrag_tokens, total_tokens, message_count, first_message_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(conversation_id, model_id) DO UPDATE SET
                    input_tokens = excluded.input_tokens,
                    output_tokens = excluded.output_tokens,
                    graphrag_tokens = excluded.graphrag_tokens,
                    total_tokens = excluded.total_tokens,
                    message_count = excluded.message_count,
                    first_message_at = excluded.first_message_at,
                    last_message_at = excluded.last_message_at",
                params![
                    record.conversation_id.as_str(),
                    record.model_id.as_str(),
                    rh::to_i64(record.input_tokens),
                    rh::to_i64(record.output_tokens),
                    rh::to_i64(record.graphrag_tokens),
                    rh::to_i64(record.total_tokens),
                    rh::to_i64(record.message_count),
                    record.first_message_at.as_ref().map(rh::format_time),
                    record.last_message_at.as_ref().map(rh::format_time),
                ],
            )?;
            Ok(())
        })
    }

    /// Most recently used first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ModelContextRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, model_id, input_tokens, output_tokens, graphrag_tokens,
                        total_tokens, message_count, first_message_at, last_message_at
                 FROM model_contexts
                 WHERE conversation_id = ?1
                 ORDER BY last_message_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let mut rows = stmt.query(params![conversation_id.as_str(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })
    }

    pub fn get(
        &self,
        conversation_id: &ConversationId,
        model_id: &ModelId,
    ) -> Result<Option<ModelContextRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, model_id, input_tokens, output_tokens, graphrag_tokens,
                        total_tokens, message_count, first_message_at, last_message_at
                 FROM model_contexts WHERE conversation_id = ?1 AND model_id = ?2",
            )?;
            let mut rows = stmt.query([conversation_id.as_str(), model_id.as_str()])?;
            rows.next()?.map(row_to_record).transpose()
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ModelContextRecord, StoreError> {
    let tokens = |idx: usize, column: &'static str| -> Result<u64, StoreError> {
        Ok(rh::to_u64(rh::get::<i64>(row, idx, TABLE, column)?))
    };
    Ok(ModelContextRecord {
        conversation_id: ConversationId::from_raw(rh::get::<String>(row, 0, TABLE, "conversation_id")?),
        model_id: ModelId::from_raw(rh::get::<String>(row, 1, TABLE, "model_id")?),
        input_tokens: tokens(2, "input_tokens")?,
        output_tokens: tokens(3, "output_tokens")?,
        graphrag_tokens: tokens(4, "graphrag_tokens")?,
        total_tokens: tokens(5, "total_tokens")?,
        message_count: tokens(6, "message_count")?,
        first_message_at: rh::parse_opt_time(rh::get(row, 7, TABLE, "first_message_at")?, TABLE, "first_message_at")?,
        last_message_at: rh::parse_opt_time(rh::get(row, 8, TABLE, "last_message_at")?, TABLE, "last_message_at")?,
    })
}
