use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{corrupt, parse_datetime, Store, StoreError, StoreResult};
use crate::models::*;

impl Store {
    // ==================== Group Operations ====================

    /// Insert the group and its creator's admin membership atomically.
    pub fn create_group_with_admin(&self, group: &mut Group) -> StoreResult<GroupMembership> {
        let mut conn = self.conn();
        group.id = Uuid::new_v4().to_string();
        group.created_at = Utc::now();

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO groups (id, name, description, created_by, is_private, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &group.id,
                &group.name,
                &group.description,
                &group.created_by,
                group.is_private,
                group.created_at.to_rfc3339(),
            ],
        )?;

        let membership = GroupMembership {
            group_id: group.id.clone(),
            user_id: group.created_by.clone(),
            role: GroupRole::Admin,
            joined_at: group.created_at,
        };
        tx.execute(
            r#"INSERT INTO group_members (group_id, user_id, role, joined_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                &membership.group_id,
                &membership.user_id,
                membership.role.to_db(),
                membership.joined_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(membership)
    }

    pub fn get_group(&self, id: &str) -> StoreResult<Group> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM groups WHERE id = ?1", params![id], row_to_group)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Group {}", id)),
                _ => StoreError::Database(e),
            })
    }

    pub fn get_membership(&self, group_id: &str, user_id: &str) -> StoreResult<Option<GroupMembership>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT * FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                row_to_membership,
            )
            .optional()?)
    }

    pub fn create_membership(&self, membership: &GroupMembership) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO group_members (group_id, user_id, role, joined_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                &membership.group_id,
                &membership.user_id,
                membership.role.to_db(),
                membership.joined_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_membership(&self, group_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!(
                "Membership {} in group {}",
                user_id, group_id
            )));
        }
        Ok(())
    }

    pub fn count_members(&self, group_id: &str) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Roster of a group, oldest member first
    pub fn list_memberships(&self, group_id: &str) -> StoreResult<Vec<GroupMembership>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM group_members WHERE group_id = ?1 ORDER BY joined_at ASC, user_id ASC",
        )?;
        let members = stmt
            .query_map(params![group_id], row_to_membership)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    /// Groups a user belongs to, with that user's membership row
    pub fn list_user_groups(&self, user_id: &str) -> StoreResult<Vec<(Group, GroupMembership)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT g.*, m.group_id, m.user_id, m.role, m.joined_at
               FROM group_members m
               JOIN groups g ON g.id = m.group_id
               WHERE m.user_id = ?1
               ORDER BY m.joined_at ASC"#,
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row_to_group(row)?, row_to_membership(row)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_by: row.get("created_by")?,
        is_private: row.get("is_private")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_membership(row: &rusqlite::Row) -> rusqlite::Result<GroupMembership> {
    let role: String = row.get("role")?;
    Ok(GroupMembership {
        group_id: row.get("group_id")?,
        user_id: row.get("user_id")?,
        role: GroupRole::from_db(&role).ok_or_else(|| corrupt("role", &role))?,
        joined_at: parse_datetime(row.get::<_, String>("joined_at")?),
    })
}
