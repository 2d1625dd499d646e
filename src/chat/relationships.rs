use std::collections::HashSet;

use super::ChatService;
use crate::error::{ChatError, ChatResult};
use crate::events::ChangeEvent;
use crate::models::*;
use crate::store::StoreError;

impl ChatService {
    /// Record a pending friend edge `from -> to`.
    /// A second request while one is pending or already accepted is a Conflict.
    pub fn send_friend_request(&self, from: &str, to: &str) -> ChatResult<Relationship> {
        if from == to {
            return Err(ChatError::invalid("Cannot send a friend request to yourself"));
        }
        self.require_user(to)?;

        let edge = self.store.create_friend_request(from, to)?;

        log::info!("Friend request {} from {} to {}", edge.id, from, to);
        self.publish(ChangeEvent::Relationships {
            users: vec![from.to_string(), to.to_string()],
        });
        Ok(edge)
    }

    /// Accept or reject a pending request addressed to `caller`.
    /// Accepting also establishes the reciprocal edge in the same transaction.
    pub fn respond_to_friend_request(&self, caller: &str, edge_id: &str, accept: bool) -> ChatResult<()> {
        let not_found = || ChatError::not_found("Friend request not found");

        let edge = match self.store.get_relationship(edge_id) {
            Ok(edge) => edge,
            Err(StoreError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if edge.kind != RelationshipKind::Friend || edge.target_user_id != caller {
            log::debug!("User {} cannot respond to relationship {}", caller, edge_id);
            return Err(not_found());
        }
        if edge.status != RelationshipStatus::Pending {
            return Err(ChatError::conflict("Friend request already answered"));
        }

        if accept {
            self.store.accept_friend_request(edge_id)?;
            log::info!("User {} accepted friend request from {}", caller, edge.user_id);
        } else {
            self.store.reject_friend_request(edge_id)?;
            log::info!("User {} rejected friend request from {}", caller, edge.user_id);
        }

        self.publish(ChangeEvent::Relationships {
            users: vec![edge.user_id, edge.target_user_id],
        });
        Ok(())
    }

    /// Replace whatever `from` had towards `to` with a block. The reverse edge is kept.
    pub fn block_user(&self, from: &str, to: &str) -> ChatResult<Relationship> {
        if from == to {
            return Err(ChatError::invalid("Cannot block yourself"));
        }
        self.require_user(to)?;

        let block = self.store.replace_with_block(from, to)?;

        log::info!("User {} blocked {}", from, to);
        self.publish(ChangeEvent::Relationships {
            users: vec![from.to_string(), to.to_string()],
        });
        Ok(block)
    }

    /// Users `user_id` holds an accepted friend edge towards
    pub fn list_friends(&self, user_id: &str) -> ChatResult<Vec<UserSummary>> {
        let edges = self.store.list_outgoing(
            user_id,
            RelationshipKind::Friend,
            RelationshipStatus::Accepted,
        )?;

        let mut seen = HashSet::new();
        let ids: Vec<&str> = edges
            .iter()
            .map(|e| e.target_user_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        self.summarize_ids(ids)
    }

    /// Pending friend requests addressed to `user_id`, oldest first
    pub fn list_pending_incoming(&self, user_id: &str) -> ChatResult<Vec<PendingRequest>> {
        let edges = self.store.list_incoming(
            user_id,
            RelationshipKind::Friend,
            RelationshipStatus::Pending,
        )?;

        let mut requests = Vec::with_capacity(edges.len());
        for edge in edges {
            let Some(sender) = self.store.find_user(&edge.user_id)? else {
                continue;
            };
            requests.push(PendingRequest {
                id: edge.id,
                user: self.summarize(&sender)?,
                created_at: edge.created_at,
            });
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_duplicate_request_is_conflict() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        chat.send_friend_request(&a.id, &b.id).unwrap();
        assert!(matches!(
            chat.send_friend_request(&a.id, &b.id),
            Err(ChatError::Conflict(_))
        ));
    }

    #[test]
    fn test_request_after_rejection_is_allowed() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let edge = chat.send_friend_request(&a.id, &b.id).unwrap();
        chat.respond_to_friend_request(&b.id, &edge.id, false).unwrap();
        assert!(chat.send_friend_request(&a.id, &b.id).is_ok());
    }

    #[test]
    fn test_only_target_can_respond() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let edge = chat.send_friend_request(&a.id, &b.id).unwrap();
        assert!(matches!(
            chat.respond_to_friend_request(&a.id, &edge.id, true),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            chat.respond_to_friend_request(&b.id, "missing", true),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn test_second_response_is_conflict() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let edge = chat.send_friend_request(&a.id, &b.id).unwrap();
        chat.respond_to_friend_request(&b.id, &edge.id, true).unwrap();
        assert!(matches!(
            chat.respond_to_friend_request(&b.id, &edge.id, false),
            Err(ChatError::Conflict(_))
        ));
    }

    #[test]
    fn test_list_friends_dedupes_targets() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        befriend(&chat, &a, &b);
        // A stray second accepted edge must not duplicate B
        edge(
            chat.store(),
            &a.id,
            &b.id,
            RelationshipKind::Friend,
            RelationshipStatus::Accepted,
        );

        let friends = chat.list_friends(&a.id).unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].id, b.id);
    }

    #[test]
    fn test_self_targets_rejected() {
        let chat = service();
        let a = user(&chat, "A");
        assert!(matches!(
            chat.send_friend_request(&a.id, &a.id),
            Err(ChatError::InvalidArgument(_))
        ));
        assert!(matches!(chat.block_user(&a.id, &a.id), Err(ChatError::InvalidArgument(_))));
        assert!(matches!(chat.block_user(&a.id, "ghost"), Err(ChatError::NotFound(_))));
    }
}
