use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use super::{corrupt, parse_datetime, Store, StoreError, StoreResult};
use crate::models::*;

impl Store {
    // ==================== Relationship Operations ====================

    /// Insert a pending friend edge `from -> to` unless one is already pending
    /// or accepted in that direction. The check and the insert share a transaction.
    pub fn create_friend_request(&self, from: &str, to: &str) -> StoreResult<Relationship> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                r#"SELECT status FROM relationships
                   WHERE user_id = ?1 AND target_user_id = ?2 AND kind = ?3
                     AND status IN ('pending', 'accepted')
                   ORDER BY created_at ASC LIMIT 1"#,
                params![from, to, RelationshipKind::Friend.to_db()],
                |row| row.get(0),
            )
            .optional()?;
        match existing.as_deref() {
            Some("accepted") => return Err(StoreError::Conflict("Already friends".into())),
            Some(_) => return Err(StoreError::Conflict("Friend request already sent".into())),
            None => {}
        }

        let mut edge = Relationship::new(from, to, RelationshipKind::Friend, RelationshipStatus::Pending);
        insert_relationship(&tx, &mut edge)?;
        tx.commit()?;
        Ok(edge)
    }

    pub fn get_relationship(&self, id: &str) -> StoreResult<Relationship> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM relationships WHERE id = ?1",
            params![id],
            row_to_relationship,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Relationship {}", id))
            }
            _ => StoreError::Database(e),
        })
    }

    /// First edge `user_id -> target_user_id` of the given kind, optionally filtered by status
    pub fn find_relationship(
        &self,
        user_id: &str,
        target_user_id: &str,
        kind: RelationshipKind,
        status: Option<RelationshipStatus>,
    ) -> StoreResult<Option<Relationship>> {
        let conn = self.conn();
        let rel = match status {
            Some(status) => conn
                .query_row(
                    r#"SELECT * FROM relationships
                       WHERE user_id = ?1 AND target_user_id = ?2 AND kind = ?3 AND status = ?4
                       ORDER BY created_at ASC LIMIT 1"#,
                    params![user_id, target_user_id, kind.to_db(), status.to_db()],
                    row_to_relationship,
                )
                .optional()?,
            None => conn
                .query_row(
                    r#"SELECT * FROM relationships
                       WHERE user_id = ?1 AND target_user_id = ?2 AND kind = ?3
                       ORDER BY created_at ASC LIMIT 1"#,
                    params![user_id, target_user_id, kind.to_db()],
                    row_to_relationship,
                )
                .optional()?,
        };
        Ok(rel)
    }

    /// Move a pending friend edge to rejected. Rejection is terminal.
    pub fn reject_friend_request(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        claim_pending(&tx, id, RelationshipStatus::Rejected, &Utc::now().to_rfc3339())?;
        tx.commit()?;
        Ok(())
    }

    /// Accept a pending friend edge and establish the reciprocal accepted edge
    /// in one transaction. An existing reverse friend edge is upgraded in place.
    pub fn accept_friend_request(&self, id: &str) -> StoreResult<Relationship> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let edge = claim_pending(&tx, id, RelationshipStatus::Accepted, &now)?;

        let reverse: Option<String> = tx
            .query_row(
                r#"SELECT id FROM relationships
                   WHERE user_id = ?1 AND target_user_id = ?2 AND kind = ?3
                   ORDER BY created_at ASC LIMIT 1"#,
                params![
                    &edge.target_user_id,
                    &edge.user_id,
                    RelationshipKind::Friend.to_db()
                ],
                |row| row.get(0),
            )
            .optional()?;

        let reciprocal_id = match reverse {
            Some(reverse_id) => {
                tx.execute(
                    "UPDATE relationships SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![RelationshipStatus::Accepted.to_db(), &now, &reverse_id],
                )?;
                reverse_id
            }
            None => {
                let reciprocal_id = Uuid::new_v4().to_string();
                tx.execute(
                    r#"INSERT INTO relationships (id, user_id, target_user_id, kind, status, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)"#,
                    params![
                        &reciprocal_id,
                        &edge.target_user_id,
                        &edge.user_id,
                        RelationshipKind::Friend.to_db(),
                        RelationshipStatus::Accepted.to_db(),
                        &now,
                    ],
                )?;
                reciprocal_id
            }
        };

        let reciprocal = tx.query_row(
            "SELECT * FROM relationships WHERE id = ?1",
            params![&reciprocal_id],
            row_to_relationship,
        )?;
        tx.commit()?;
        Ok(reciprocal)
    }

    /// Drop every outbound edge `user_id -> target_user_id`, then record the block.
    /// The reverse direction is left untouched.
    pub fn replace_with_block(&self, user_id: &str, target_user_id: &str) -> StoreResult<Relationship> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM relationships WHERE user_id = ?1 AND target_user_id = ?2",
            params![user_id, target_user_id],
        )?;

        let mut block = Relationship::new(
            user_id,
            target_user_id,
            RelationshipKind::Blocked,
            RelationshipStatus::Accepted,
        );
        insert_relationship(&tx, &mut block)?;

        tx.commit()?;
        Ok(block)
    }

    /// Edges leaving `user_id` with the given kind and status
    pub fn list_outgoing(
        &self,
        user_id: &str,
        kind: RelationshipKind,
        status: RelationshipStatus,
    ) -> StoreResult<Vec<Relationship>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM relationships
               WHERE user_id = ?1 AND kind = ?2 AND status = ?3
               ORDER BY created_at ASC"#,
        )?;
        let rels = stmt
            .query_map(params![user_id, kind.to_db(), status.to_db()], row_to_relationship)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rels)
    }

    /// Edges pointing at `target_user_id` with the given kind and status
    pub fn list_incoming(
        &self,
        target_user_id: &str,
        kind: RelationshipKind,
        status: RelationshipStatus,
    ) -> StoreResult<Vec<Relationship>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM relationships
               WHERE target_user_id = ?1 AND kind = ?2 AND status = ?3
               ORDER BY created_at ASC"#,
        )?;
        let rels = stmt
            .query_map(
                params![target_user_id, kind.to_db(), status.to_db()],
                row_to_relationship,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rels)
    }
}

/// Move a pending edge to `status`. Conflict if it is no longer pending.
fn claim_pending(
    tx: &Transaction,
    id: &str,
    status: RelationshipStatus,
    now: &str,
) -> StoreResult<Relationship> {
    let rows = tx.execute(
        "UPDATE relationships SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![status.to_db(), now, id, RelationshipStatus::Pending.to_db()],
    )?;

    let edge = tx
        .query_row(
            "SELECT * FROM relationships WHERE id = ?1",
            params![id],
            row_to_relationship,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("Relationship {}", id)))?;
    if rows == 0 {
        return Err(StoreError::Conflict("Friend request already answered".into()));
    }
    Ok(edge)
}

pub(super) fn insert_relationship(conn: &Connection, rel: &mut Relationship) -> StoreResult<()> {
    rel.id = Uuid::new_v4().to_string();
    let now = Utc::now();
    rel.created_at = now;
    rel.updated_at = now;

    conn.execute(
        r#"INSERT INTO relationships (id, user_id, target_user_id, kind, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            &rel.id,
            &rel.user_id,
            &rel.target_user_id,
            rel.kind.to_db(),
            rel.status.to_db(),
            rel.created_at.to_rfc3339(),
            rel.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    Ok(Relationship {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        target_user_id: row.get("target_user_id")?,
        kind: RelationshipKind::from_db(&kind).ok_or_else(|| corrupt("kind", &kind))?,
        status: RelationshipStatus::from_db(&status).ok_or_else(|| corrupt("status", &status))?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}
