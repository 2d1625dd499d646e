//! File storage collaborator.
//!
//! Uploads follow a two-step protocol: the caller asks for a one-shot upload
//! ticket, posts the raw bytes to the ticket's URL and receives an opaque
//! storage id. Messages and profiles only ever hold that id; the chat core
//! never reads file bytes.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{BlobRecord, Store, StoreError, UploadTicketRecord};

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("upload link expired")]
    TicketExpired,
    #[error("upload link already used")]
    TicketUsed,
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("empty upload")]
    EmptyBody,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    #[serde(skip_serializing)]
    pub token: String,
    pub upload_url: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobMeta {
    pub id: String,
    pub owner_id: String,
    pub content_type: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Opaque content store returning retrievable URLs for storage ids
pub trait BlobStore: Send + Sync {
    /// Issue a single-use upload ticket for `owner_id`
    fn create_upload(&self, owner_id: &str) -> BlobResult<UploadTicket>;

    /// Redeem a ticket with the uploaded bytes; returns the new storage id
    fn complete_upload(&self, token: &str, content_type: &str, data: Vec<u8>) -> BlobResult<String>;

    fn metadata(&self, storage_id: &str) -> BlobResult<BlobMeta>;

    fn read(&self, storage_id: &str) -> BlobResult<StoredBlob>;

    /// Public URL under which `storage_id` can be fetched
    fn url_for(&self, storage_id: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub public_base_url: String,
    pub upload_ttl_secs: i64,
    pub max_upload_bytes: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            upload_ttl_secs: 3600,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Blob store kept in the application's SQLite database
pub struct SqliteBlobStore {
    store: Arc<Store>,
    config: BlobConfig,
}

impl SqliteBlobStore {
    pub fn new(store: Arc<Store>, config: BlobConfig) -> Self {
        Self { store, config }
    }

    fn base_url(&self) -> &str {
        self.config.public_base_url.trim_end_matches('/')
    }
}

impl BlobStore for SqliteBlobStore {
    fn create_upload(&self, owner_id: &str) -> BlobResult<UploadTicket> {
        let now = Utc::now();
        let record = UploadTicketRecord {
            token: Uuid::new_v4().to_string().replace('-', ""),
            owner_id: owner_id.to_string(),
            expires_at: now + Duration::seconds(self.config.upload_ttl_secs),
            used_at: None,
            created_at: now,
        };
        self.store.create_upload_ticket(&record)?;

        Ok(UploadTicket {
            upload_url: format!("{}/api/files/upload/{}", self.base_url(), record.token),
            token: record.token,
            expires_at: record.expires_at,
        })
    }

    fn complete_upload(&self, token: &str, content_type: &str, data: Vec<u8>) -> BlobResult<String> {
        let ticket = self.store.get_upload_ticket(token).map_err(|e| match e {
            StoreError::NotFound(_) => BlobError::NotFound("upload".to_string()),
            other => BlobError::Store(other),
        })?;

        if ticket.used_at.is_some() {
            return Err(BlobError::TicketUsed);
        }
        if ticket.expires_at < Utc::now() {
            return Err(BlobError::TicketExpired);
        }
        if data.is_empty() {
            return Err(BlobError::EmptyBody);
        }
        if data.len() > self.config.max_upload_bytes {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.config.max_upload_bytes,
            });
        }

        let blob = BlobRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: ticket.owner_id,
            content_type: content_type.to_string(),
            size: data.len() as i64,
            data,
            created_at: Utc::now(),
        };
        if !self.store.redeem_upload_ticket(token, &blob)? {
            return Err(BlobError::TicketUsed);
        }
        log::debug!("Stored file {} ({} bytes)", blob.id, blob.size);
        Ok(blob.id)
    }

    fn metadata(&self, storage_id: &str) -> BlobResult<BlobMeta> {
        self.store
            .get_blob_meta(storage_id)?
            .map(|b| BlobMeta {
                id: b.id,
                owner_id: b.owner_id,
                content_type: b.content_type,
                size: b.size,
            })
            .ok_or_else(|| BlobError::NotFound(storage_id.to_string()))
    }

    fn read(&self, storage_id: &str) -> BlobResult<StoredBlob> {
        let blob = self.store.get_blob(storage_id).map_err(|e| match e {
            StoreError::NotFound(_) => BlobError::NotFound(storage_id.to_string()),
            other => BlobError::Store(other),
        })?;
        Ok(StoredBlob {
            content_type: blob.content_type,
            data: blob.data,
        })
    }

    fn url_for(&self, storage_id: &str) -> String {
        format!("{}/api/files/{}", self.base_url(), storage_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_store(config: BlobConfig) -> SqliteBlobStore {
        SqliteBlobStore::new(Arc::new(Store::in_memory().unwrap()), config)
    }

    #[test]
    fn test_upload_round_trip() {
        let blobs = blob_store(BlobConfig::default());
        let ticket = blobs.create_upload("user-1").unwrap();
        assert!(ticket.upload_url.ends_with(&ticket.token));

        let id = blobs
            .complete_upload(&ticket.token, "image/png", vec![1, 2, 3])
            .unwrap();
        let meta = blobs.metadata(&id).unwrap();
        assert_eq!(meta.content_type, "image/png");
        assert_eq!(meta.size, 3);
        assert_eq!(meta.owner_id, "user-1");
        assert_eq!(blobs.read(&id).unwrap().data, vec![1, 2, 3]);
        assert_eq!(blobs.url_for(&id), format!("/api/files/{}", id));
    }

    #[test]
    fn test_ticket_is_single_use() {
        let blobs = blob_store(BlobConfig::default());
        let ticket = blobs.create_upload("user-1").unwrap();
        blobs.complete_upload(&ticket.token, "image/png", vec![1]).unwrap();
        assert!(matches!(
            blobs.complete_upload(&ticket.token, "image/png", vec![1]),
            Err(BlobError::TicketUsed)
        ));
    }

    #[test]
    fn test_expired_and_oversize_uploads_rejected() {
        let blobs = blob_store(BlobConfig {
            upload_ttl_secs: -1,
            ..BlobConfig::default()
        });
        let ticket = blobs.create_upload("user-1").unwrap();
        assert!(matches!(
            blobs.complete_upload(&ticket.token, "image/png", vec![1]),
            Err(BlobError::TicketExpired)
        ));

        let blobs = blob_store(BlobConfig {
            max_upload_bytes: 2,
            ..BlobConfig::default()
        });
        let ticket = blobs.create_upload("user-1").unwrap();
        assert!(matches!(
            blobs.complete_upload(&ticket.token, "image/png", vec![1, 2, 3]),
            Err(BlobError::TooLarge { size: 3, max: 2 })
        ));
    }

    #[test]
    fn test_unknown_ids() {
        let blobs = blob_store(BlobConfig {
            public_base_url: "https://chat.example/".to_string(),
            ..BlobConfig::default()
        });
        assert!(matches!(blobs.metadata("missing"), Err(BlobError::NotFound(_))));
        assert!(matches!(blobs.read("missing"), Err(BlobError::NotFound(_))));
        assert!(matches!(
            blobs.complete_upload("missing", "image/png", vec![1]),
            Err(BlobError::NotFound(_))
        ));
        assert_eq!(blobs.url_for("abc"), "https://chat.example/api/files/abc");
    }
}
