use chrono::Utc;
use std::collections::HashSet;

use super::ChatService;
use crate::error::{ChatError, ChatResult};
use crate::events::ChangeEvent;
use crate::models::*;
use crate::store::StoreError;

impl ChatService {
    /// Create a group owned by `creator`, who becomes its first admin.
    pub fn create_group(
        &self,
        creator: &str,
        name: &str,
        description: Option<&str>,
        is_private: bool,
    ) -> ChatResult<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::invalid("Group name is required"));
        }

        let mut group = Group {
            id: String::new(),
            name: name.to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            created_by: creator.to_string(),
            is_private,
            created_at: Utc::now(),
        };
        self.store.create_group_with_admin(&mut group)?;

        log::info!("User {} created group {} ({})", creator, group.id, group.name);
        self.publish(ChangeEvent::GroupRoster {
            group_id: group.id.clone(),
            users: vec![creator.to_string()],
        });
        Ok(group)
    }

    /// Admins may add their own friends as plain members.
    pub fn add_member(&self, actor: &str, group_id: &str, user_id: &str) -> ChatResult<GroupMembership> {
        self.require_admin(actor, group_id)?;

        if self.store.get_membership(group_id, user_id)?.is_some() {
            return Err(ChatError::conflict("User is already a member"));
        }
        if !self.is_friend(actor, user_id)? {
            log::debug!("User {} tried to add non-friend {} to {}", actor, user_id, group_id);
            return Err(ChatError::forbidden("You can only add your friends"));
        }

        let membership = GroupMembership {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            role: GroupRole::Member,
            joined_at: Utc::now(),
        };
        match self.store.create_membership(&membership) {
            Ok(()) => {}
            // Lost a race with a concurrent add
            Err(StoreError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(ChatError::conflict("User is already a member"));
            }
            Err(e) => return Err(e.into()),
        }

        log::info!("User {} added {} to group {}", actor, user_id, group_id);
        self.publish(ChangeEvent::GroupRoster {
            group_id: group_id.to_string(),
            users: self.roster_ids(group_id)?,
        });
        Ok(membership)
    }

    /// Admins may remove anyone except the group's creator.
    pub fn remove_member(&self, actor: &str, group_id: &str, user_id: &str) -> ChatResult<()> {
        let group = self.require_admin(actor, group_id)?;

        if self.store.get_membership(group_id, user_id)?.is_none() {
            return Err(ChatError::not_found("User is not a member of this group"));
        }
        if user_id == group.created_by {
            return Err(ChatError::forbidden("The group creator cannot be removed"));
        }

        let roster = self.roster_ids(group_id)?;
        self.store.delete_membership(group_id, user_id)?;

        log::info!("User {} removed {} from group {}", actor, user_id, group_id);
        self.publish(ChangeEvent::GroupRoster {
            group_id: group_id.to_string(),
            users: roster,
        });
        Ok(())
    }

    pub fn leave_group(&self, actor: &str, group_id: &str) -> ChatResult<()> {
        let group = self.store.get_group(group_id)?;
        if self.store.get_membership(group_id, actor)?.is_none() {
            return Err(ChatError::not_found("You are not a member of this group"));
        }
        if actor == group.created_by {
            return Err(ChatError::forbidden("The group creator cannot leave"));
        }

        let roster = self.roster_ids(group_id)?;
        self.store.delete_membership(group_id, actor)?;

        log::info!("User {} left group {}", actor, group_id);
        self.publish(ChangeEvent::GroupRoster {
            group_id: group_id.to_string(),
            users: roster,
        });
        Ok(())
    }

    pub fn is_member(&self, user_id: &str, group_id: &str) -> ChatResult<bool> {
        Ok(self.store.get_membership(group_id, user_id)?.is_some())
    }

    pub fn is_admin(&self, user_id: &str, group_id: &str) -> ChatResult<bool> {
        Ok(matches!(
            self.store.get_membership(group_id, user_id)?,
            Some(m) if m.role == GroupRole::Admin
        ))
    }

    pub fn member_count(&self, group_id: &str) -> ChatResult<i64> {
        Ok(self.store.count_members(group_id)?)
    }

    /// Roster of a group the caller belongs to
    pub fn list_members(&self, caller: &str, group_id: &str) -> ChatResult<Vec<GroupMember>> {
        self.require_member(caller, group_id)?;

        let mut members = Vec::new();
        for membership in self.store.list_memberships(group_id)? {
            let Some(user) = self.store.find_user(&membership.user_id)? else {
                continue;
            };
            members.push(GroupMember {
                user: self.summarize(&user)?,
                role: membership.role,
                joined_at: membership.joined_at,
            });
        }
        Ok(members)
    }

    /// Groups of `user_id` with their own role and the live member count
    pub fn list_user_groups(&self, user_id: &str) -> ChatResult<Vec<UserGroup>> {
        self.store
            .list_user_groups(user_id)?
            .into_iter()
            .map(|(group, membership)| {
                let member_count = self.store.count_members(&group.id)?;
                Ok(UserGroup {
                    group,
                    role: membership.role,
                    member_count,
                })
            })
            .collect()
    }

    /// The caller's own friends who are not yet in the group
    pub fn list_addable_friends(&self, actor: &str, group_id: &str) -> ChatResult<Vec<UserSummary>> {
        self.require_member(actor, group_id)?;

        let members: HashSet<String> = self.roster_ids(group_id)?.into_iter().collect();
        Ok(self
            .list_friends(actor)?
            .into_iter()
            .filter(|friend| !members.contains(&friend.id))
            .collect())
    }

    fn roster_ids(&self, group_id: &str) -> ChatResult<Vec<String>> {
        Ok(self
            .store
            .list_memberships(group_id)?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }
}
