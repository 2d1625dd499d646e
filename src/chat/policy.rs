//! Authorization checks shared by every chat operation
//!
//! Each helper returns `Ok` when the caller may proceed and the matching
//! `ChatError` otherwise. Rejections are logged at debug.

use super::ChatService;
use crate::blob::BlobMeta;
use crate::error::{ChatError, ChatResult};
use crate::models::*;

impl ChatService {
    /// Caller's membership in `group_id`, or Forbidden
    pub(crate) fn require_member(&self, user_id: &str, group_id: &str) -> ChatResult<GroupMembership> {
        match self.store.get_membership(group_id, user_id)? {
            Some(membership) => Ok(membership),
            None => {
                log::debug!("User {} is not a member of group {}", user_id, group_id);
                Err(ChatError::forbidden("Not a member of this group"))
            }
        }
    }

    /// Existing group where `user_id` holds the admin role.
    /// Unknown groups are NotFound, non-admins Forbidden.
    pub(crate) fn require_admin(&self, user_id: &str, group_id: &str) -> ChatResult<Group> {
        let group = self.store.get_group(group_id)?;
        match self.store.get_membership(group_id, user_id)? {
            Some(m) if m.role == GroupRole::Admin => Ok(group),
            _ => {
                log::debug!("User {} is not an admin of group {}", user_id, group_id);
                Err(ChatError::forbidden("Only group admins can do this"))
            }
        }
    }

    pub(crate) fn require_user(&self, user_id: &str) -> ChatResult<User> {
        self.store
            .find_user(user_id)?
            .ok_or_else(|| ChatError::not_found(format!("User {}", user_id)))
    }

    /// Directional: true iff an accepted friend edge `a -> b` exists
    pub fn is_friend(&self, a: &str, b: &str) -> ChatResult<bool> {
        Ok(self
            .store
            .find_relationship(a, b, RelationshipKind::Friend, Some(RelationshipStatus::Accepted))?
            .is_some())
    }

    /// True iff `a` has blocked `b`
    pub fn is_blocked_by(&self, a: &str, b: &str) -> ChatResult<bool> {
        Ok(self
            .store
            .find_relationship(a, b, RelationshipKind::Blocked, None)?
            .is_some())
    }

    /// Gate for posting into `target`: group membership, or not blocked by the recipient
    pub(crate) fn ensure_can_post(&self, author_id: &str, target: &MessageTarget) -> ChatResult<()> {
        match target {
            MessageTarget::Group(group_id) => {
                self.require_member(author_id, group_id)?;
            }
            MessageTarget::Direct(recipient_id) => {
                self.require_user(recipient_id)?;
                if self.is_blocked_by(recipient_id, author_id)? {
                    log::debug!("User {} is blocked by {}", author_id, recipient_id);
                    return Err(ChatError::forbidden("You cannot message this user"));
                }
            }
        }
        Ok(())
    }

    /// The message, if `user_id` wrote it
    pub(crate) fn require_author(&self, user_id: &str, message_id: &str) -> ChatResult<Message> {
        let message = self.store.get_message(message_id)?;
        if message.author_id != user_id {
            log::debug!("User {} is not the author of message {}", user_id, message_id);
            return Err(ChatError::forbidden("You can only change your own messages"));
        }
        Ok(message)
    }

    /// A stored image uploaded by `user_id`
    pub(crate) fn require_own_image(&self, user_id: &str, file_ref: &str) -> ChatResult<BlobMeta> {
        let meta = self.blobs.metadata(file_ref)?;
        if meta.owner_id != user_id {
            log::debug!("User {} does not own file {}", user_id, file_ref);
            return Err(ChatError::forbidden("You can only share your own uploads"));
        }
        if !is_allowed_file_type(&meta.content_type) {
            return Err(ChatError::invalid(format!(
                "File type {} is not allowed",
                meta.content_type
            )));
        }
        Ok(meta)
    }
}
