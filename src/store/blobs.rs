use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, parse_optional_datetime, Store, StoreError, StoreResult};

/// A one-shot permission to upload a single file
#[derive(Debug, Clone)]
pub struct UploadTicketRecord {
    pub token: String,
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Stored file bytes and their metadata
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub id: String,
    pub owner_id: String,
    pub content_type: String,
    pub size: i64,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    // ==================== Upload Operations ====================

    pub fn create_upload_ticket(&self, ticket: &UploadTicketRecord) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO uploads (token, owner_id, expires_at, used_at, created_at)
               VALUES (?1, ?2, ?3, NULL, ?4)"#,
            params![
                &ticket.token,
                &ticket.owner_id,
                ticket.expires_at.to_rfc3339(),
                ticket.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_upload_ticket(&self, token: &str) -> StoreResult<UploadTicketRecord> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM uploads WHERE token = ?1",
            params![token],
            |row| {
                Ok(UploadTicketRecord {
                    token: row.get("token")?,
                    owner_id: row.get("owner_id")?,
                    expires_at: parse_datetime(row.get::<_, String>("expires_at")?),
                    used_at: parse_optional_datetime(row.get("used_at")?),
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Upload".to_string()),
            _ => StoreError::Database(e),
        })
    }

    /// Mark the ticket used and store the blob in one transaction.
    /// Returns false if the ticket was already consumed.
    pub fn redeem_upload_ticket(&self, token: &str, blob: &BlobRecord) -> StoreResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE uploads SET used_at = ?1 WHERE token = ?2 AND used_at IS NULL",
            params![blob.created_at.to_rfc3339(), token],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            r#"INSERT INTO blobs (id, owner_id, content_type, size, data, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &blob.id,
                &blob.owner_id,
                &blob.content_type,
                blob.size,
                &blob.data,
                blob.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Blob metadata without the payload
    pub fn get_blob_meta(&self, id: &str) -> StoreResult<Option<BlobRecord>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, owner_id, content_type, size, created_at FROM blobs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(BlobRecord {
                        id: row.get("id")?,
                        owner_id: row.get("owner_id")?,
                        content_type: row.get("content_type")?,
                        size: row.get("size")?,
                        data: Vec::new(),
                        created_at: parse_datetime(row.get::<_, String>("created_at")?),
                    })
                },
            )
            .optional()?)
    }

    pub fn get_blob(&self, id: &str) -> StoreResult<BlobRecord> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM blobs WHERE id = ?1", params![id], |row| {
            Ok(BlobRecord {
                id: row.get("id")?,
                owner_id: row.get("owner_id")?,
                content_type: row.get("content_type")?,
                size: row.get("size")?,
                data: row.get("data")?,
                created_at: parse_datetime(row.get::<_, String>("created_at")?),
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("File {}", id)),
            _ => StoreError::Database(e),
        })
    }
}
