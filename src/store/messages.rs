use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::{corrupt, parse_datetime, parse_optional_datetime, Store, StoreError, StoreResult};
use crate::models::*;

impl Store {
    // ==================== Message Operations ====================

    pub fn create_message(&self, message: &mut Message) -> StoreResult<()> {
        let conn = self.conn();
        message.id = Uuid::new_v4().to_string();
        message.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO messages (id, author_id, group_id, recipient_id, type, content,
                file_ref, file_name, file_type, reply_to_id, is_deleted, edited_at, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                &message.id,
                &message.author_id,
                &message.group_id,
                &message.recipient_id,
                message.message_type.to_db(),
                &message.content,
                &message.file_ref,
                &message.file_name,
                &message.file_type,
                &message.reply_to_id,
                message.is_deleted,
                message.edited_at.map(|t| t.to_rfc3339()),
                message.created_at.to_rfc3339(),
            ],
        )?;
        message.seq = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> StoreResult<Message> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], row_to_message)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Message {}", id))
                }
                _ => StoreError::Database(e),
            })
    }

    pub fn update_message_content(
        &self,
        id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
            params![content, edited_at.to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Message {}", id)));
        }
        Ok(())
    }

    /// Soft delete: the row stays so ordering and reply references remain stable,
    /// but its body and attachment are cleared.
    pub fn soft_delete_message(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            r#"UPDATE messages SET is_deleted = 1, content = NULL, file_ref = NULL,
                   file_name = NULL, file_type = NULL
               WHERE id = ?1"#,
            params![id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Message {}", id)));
        }
        Ok(())
    }

    /// Newest `limit` messages of a group, newest first
    pub fn recent_group_messages(&self, group_id: &str, limit: i64) -> StoreResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE group_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![group_id, limit], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Newest `limit` direct messages exchanged between `a` and `b`, newest first
    pub fn recent_direct_messages(&self, a: &str, b: &str, limit: i64) -> StoreResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM messages
               WHERE (author_id = ?1 AND recipient_id = ?2)
                  OR (author_id = ?2 AND recipient_id = ?1)
               ORDER BY seq DESC LIMIT ?3"#,
        )?;
        let messages = stmt
            .query_map(params![a, b, limit], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let message_type: String = row.get("type")?;
    Ok(Message {
        id: row.get("id")?,
        seq: row.get("seq")?,
        author_id: row.get("author_id")?,
        group_id: row.get("group_id")?,
        recipient_id: row.get("recipient_id")?,
        message_type: MessageType::from_db(&message_type)
            .ok_or_else(|| corrupt("type", &message_type))?,
        content: row.get("content")?,
        file_ref: row.get("file_ref")?,
        file_name: row.get("file_name")?,
        file_type: row.get("file_type")?,
        reply_to_id: row.get("reply_to_id")?,
        is_deleted: row.get("is_deleted")?,
        edited_at: parse_optional_datetime(row.get("edited_at")?),
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}
