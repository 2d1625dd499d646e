use chrono::Utc;
use std::collections::HashMap;

use super::ChatService;
use crate::error::{ChatError, ChatResult};
use crate::events::ChangeEvent;
use crate::models::*;
use crate::store::StoreError;

impl ChatService {
    /// Post a text message, or a reply when `reply_to_id` is given.
    pub fn send_message(
        &self,
        author: &str,
        content: &str,
        target: &MessageTarget,
        reply_to_id: Option<&str>,
    ) -> ChatResult<Message> {
        self.ensure_can_post(author, target)?;
        if content.trim().is_empty() {
            return Err(ChatError::invalid("Message content is required"));
        }

        let reply_to_id = reply_to_id.filter(|id| !id.trim().is_empty());
        if let Some(reply_to_id) = reply_to_id {
            self.check_reply_target(author, target, reply_to_id)?;
        }

        let mut message = Message::text(author, target, content, reply_to_id);
        self.store.create_message(&mut message)?;

        self.publish(conversation_event(&message));
        Ok(message)
    }

    /// Post an uploaded image. `attachment.file_ref` must name a stored file.
    pub fn send_file(
        &self,
        author: &str,
        attachment: &FileAttachment,
        target: &MessageTarget,
    ) -> ChatResult<Message> {
        self.ensure_can_post(author, target)?;
        if attachment.file_name.trim().is_empty() {
            return Err(ChatError::invalid("File name is required"));
        }
        if !is_allowed_file_type(&attachment.file_type) {
            return Err(ChatError::invalid(format!(
                "File type {} is not allowed",
                attachment.file_type
            )));
        }
        let meta = self.require_own_image(author, &attachment.file_ref)?;
        if meta.content_type != attachment.file_type {
            return Err(ChatError::invalid(format!(
                "File {} is stored as {}, not {}",
                attachment.file_ref, meta.content_type, attachment.file_type
            )));
        }

        let mut message = Message::file(author, target, attachment);
        self.store.create_message(&mut message)?;

        self.publish(conversation_event(&message));
        Ok(message)
    }

    pub fn edit_message(&self, author: &str, message_id: &str, content: &str) -> ChatResult<Message> {
        let message = self.require_author(author, message_id)?;
        if message.is_deleted {
            return Err(ChatError::invalid("Deleted messages cannot be edited"));
        }
        if !message.message_type.is_editable() {
            return Err(ChatError::invalid("File messages cannot be edited"));
        }
        if content.trim().is_empty() {
            return Err(ChatError::invalid("Message content is required"));
        }

        self.store.update_message_content(message_id, content, Utc::now())?;
        let updated = self.store.get_message(message_id)?;

        self.publish(conversation_event(&updated));
        Ok(updated)
    }

    /// Soft delete. Deleting an already deleted message succeeds without change.
    pub fn delete_message(&self, author: &str, message_id: &str) -> ChatResult<()> {
        let message = self.require_author(author, message_id)?;
        if message.is_deleted {
            return Ok(());
        }

        self.store.soft_delete_message(message_id)?;

        log::info!("User {} deleted message {}", author, message_id);
        self.publish(conversation_event(&message));
        Ok(())
    }

    /// Latest messages of a group, oldest first
    pub fn list_group_messages(
        &self,
        caller: &str,
        group_id: &str,
        limit: Option<i64>,
    ) -> ChatResult<Vec<MessageView>> {
        self.require_member(caller, group_id)?;

        let mut messages = self.store.recent_group_messages(group_id, self.clamp_limit(limit))?;
        messages.reverse();
        self.render(messages)
    }

    /// Latest messages between `caller` and `other_user_id`, oldest first.
    /// Blocks gate sending only; history stays readable.
    pub fn list_direct_messages(
        &self,
        caller: &str,
        other_user_id: &str,
        limit: Option<i64>,
    ) -> ChatResult<Vec<MessageView>> {
        let mut messages =
            self.store
                .recent_direct_messages(caller, other_user_id, self.clamp_limit(limit))?;
        messages.reverse();
        self.render(messages)
    }

    fn clamp_limit(&self, limit: Option<i64>) -> i64 {
        limit.unwrap_or(self.page_size).clamp(1, self.page_size)
    }

    fn check_reply_target(&self, author: &str, target: &MessageTarget, reply_to_id: &str) -> ChatResult<()> {
        let original = match self.store.get_message(reply_to_id) {
            Ok(m) => m,
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::not_found("Message being replied to not found"))
            }
            Err(e) => return Err(e.into()),
        };

        let same_conversation = match target {
            MessageTarget::Group(group_id) => original.group_id.as_deref() == Some(group_id.as_str()),
            MessageTarget::Direct(recipient_id) => original.is_between(author, recipient_id),
        };
        if !same_conversation {
            return Err(ChatError::invalid("Replies must stay in the same conversation"));
        }
        Ok(())
    }

    /// Attach author names, file URLs and read-time reply snapshots
    fn render(&self, messages: Vec<Message>) -> ChatResult<Vec<MessageView>> {
        let mut names: HashMap<String, String> = HashMap::new();
        let mut views = Vec::with_capacity(messages.len());

        for message in messages {
            let author_name = self.cached_name(&mut names, &message.author_id)?;

            let reply_to = match message.reply_to_id.as_deref() {
                Some(id) => match self.store.get_message(id) {
                    Ok(original) if !original.is_deleted => Some(ReplySnapshot {
                        author_name: self.cached_name(&mut names, &original.author_id)?,
                        id: original.id,
                        content: original.content,
                    }),
                    Ok(_) | Err(StoreError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };

            views.push(MessageView {
                author: AuthorRef {
                    id: message.author_id.clone(),
                    name: author_name,
                },
                file_url: message.file_ref.as_deref().map(|r| self.blobs.url_for(r)),
                reply_to,
                message,
            });
        }
        Ok(views)
    }

    fn cached_name(&self, names: &mut HashMap<String, String>, user_id: &str) -> ChatResult<String> {
        if let Some(name) = names.get(user_id) {
            return Ok(name.clone());
        }
        let name = self.display_name_of(user_id)?;
        names.insert(user_id.to_string(), name.clone());
        Ok(name)
    }
}

fn conversation_event(message: &Message) -> ChangeEvent {
    match (&message.group_id, &message.recipient_id) {
        (Some(group_id), _) => ChangeEvent::GroupMessages {
            group_id: group_id.clone(),
        },
        (None, recipient) => ChangeEvent::DirectMessages {
            a: message.author_id.clone(),
            b: recipient.clone().unwrap_or_default(),
        },
    }
}
