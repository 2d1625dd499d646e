use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Shown when an author has neither a nickname nor a name.
pub const UNKNOWN_AUTHOR: &str = "Unknown user";

/// MIME types accepted for file messages and profile photos
pub const ALLOWED_FILE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/jpg", "image/gif"];

pub fn is_allowed_file_type(file_type: &str) -> bool {
    ALLOWED_FILE_TYPES.contains(&file_type)
}

/// User is an authenticated account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile holds the optional, user-editable presentation of a User.
/// Created on first update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub nickname: Option<String>,
    pub profile_photo_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Friend,
    Blocked,
}

impl RelationshipKind {
    pub fn to_db(self) -> &'static str {
        match self {
            RelationshipKind::Friend => "friend",
            RelationshipKind::Blocked => "blocked",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "friend" => Some(RelationshipKind::Friend),
            "blocked" => Some(RelationshipKind::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RelationshipStatus {
    pub fn to_db(self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Accepted => "accepted",
            RelationshipStatus::Rejected => "rejected",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RelationshipStatus::Pending),
            "accepted" => Some(RelationshipStatus::Accepted),
            "rejected" => Some(RelationshipStatus::Rejected),
            _ => None,
        }
    }
}

/// Relationship is a directed edge from `user_id` to `target_user_id`.
/// An established friendship is two accepted friend edges, one per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub user_id: String,
    pub target_user_id: String,
    pub kind: RelationshipKind,
    pub status: RelationshipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(
        user_id: &str,
        target_user_id: &str,
        kind: RelationshipKind,
        status: RelationshipStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            user_id: user_id.to_string(),
            target_user_id: target_user_id.to_string(),
            kind,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Group is a named channel. `created_by` is the permanent owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub fn to_db(self) -> &'static str {
        match self {
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(GroupRole::Admin),
            "member" => Some(GroupRole::Member),
            _ => None,
        }
    }
}

/// GroupMembership grants a user a role within a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: String,
    pub user_id: String,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
    Reply,
}

impl MessageType {
    pub fn to_db(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
            MessageType::Reply => "reply",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "file" => Some(MessageType::File),
            "reply" => Some(MessageType::Reply),
            _ => None,
        }
    }

    pub fn is_editable(self) -> bool {
        matches!(self, MessageType::Text | MessageType::Reply)
    }
}

/// Message belongs to exactly one group or to one direct pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(skip_serializing)]
    pub seq: i64,
    pub author_id: String,
    pub group_id: Option<String>,
    pub recipient_id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub file_ref: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub reply_to_id: Option<String>,
    pub is_deleted: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn blank(author_id: &str, target: &MessageTarget, message_type: MessageType) -> Self {
        let (group_id, recipient_id) = match target {
            MessageTarget::Group(g) => (Some(g.clone()), None),
            MessageTarget::Direct(r) => (None, Some(r.clone())),
        };
        Self {
            id: String::new(),
            seq: 0,
            author_id: author_id.to_string(),
            group_id,
            recipient_id,
            message_type,
            content: None,
            file_ref: None,
            file_name: None,
            file_type: None,
            reply_to_id: None,
            is_deleted: false,
            edited_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn text(author_id: &str, target: &MessageTarget, content: &str, reply_to_id: Option<&str>) -> Self {
        let message_type = if reply_to_id.is_some() {
            MessageType::Reply
        } else {
            MessageType::Text
        };
        let mut message = Self::blank(author_id, target, message_type);
        message.content = Some(content.to_string());
        message.reply_to_id = reply_to_id.map(str::to_string);
        message
    }

    pub fn file(author_id: &str, target: &MessageTarget, attachment: &FileAttachment) -> Self {
        let mut message = Self::blank(author_id, target, MessageType::File);
        message.file_ref = Some(attachment.file_ref.clone());
        message.file_name = Some(attachment.file_name.clone());
        message.file_type = Some(attachment.file_type.clone());
        message
    }

    /// True if this is a direct message between `a` and `b`, in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        match self.recipient_id.as_deref() {
            Some(recipient) => {
                (self.author_id == a && recipient == b) || (self.author_id == b && recipient == a)
            }
            None => false,
        }
    }
}

/// Where a message is posted: a group, or a direct conversation with a recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Group(String),
    Direct(String),
}

impl MessageTarget {
    /// Exactly one of `group_id` / `recipient_id` must be present.
    pub fn from_parts(group_id: Option<String>, recipient_id: Option<String>) -> ChatResult<Self> {
        let group_id = group_id.filter(|s| !s.trim().is_empty());
        let recipient_id = recipient_id.filter(|s| !s.trim().is_empty());
        match (group_id, recipient_id) {
            (Some(g), None) => Ok(MessageTarget::Group(g)),
            (None, Some(r)) => Ok(MessageTarget::Direct(r)),
            (None, None) => Err(ChatError::invalid("Must specify either group or recipient")),
            (Some(_), Some(_)) => Err(ChatError::invalid(
                "Cannot specify both group and recipient",
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub file_ref: String,
    pub file_name: String,
    pub file_type: String,
}

// ==================== Read projections ====================

/// Public view of another user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub profile_photo_url: Option<String>,
}

/// The caller's own account, including profile fields
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub nickname: Option<String>,
    pub profile_photo_ref: Option<String>,
    pub profile_photo_url: Option<String>,
}

/// An incoming friend request, keyed by its edge id
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub id: String,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// A group as seen by one of its members
#[derive(Debug, Clone, Serialize)]
pub struct UserGroup {
    #[serde(flatten)]
    pub group: Group,
    pub role: GroupRole,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    #[serde(flatten)]
    pub user: UserSummary,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorRef {
    pub id: String,
    pub name: String,
}

/// Read-time snapshot of the message being replied to
#[derive(Debug, Clone, Serialize)]
pub struct ReplySnapshot {
    pub id: String,
    pub content: Option<String>,
    pub author_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author: AuthorRef,
    pub file_url: Option<String>,
    pub reply_to: Option<ReplySnapshot>,
}

/// Nickname wins over the account name; empty strings count as absent.
pub fn display_name(nickname: Option<&str>, name: Option<&str>) -> String {
    nickname
        .filter(|n| !n.trim().is_empty())
        .or_else(|| name.filter(|n| !n.trim().is_empty()))
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string()
}

// Request/Response types for API
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub nickname: Option<String>,
    pub profile_photo_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetUserRequest {
    pub target_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondToFriendRequest {
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub group_id: Option<String>,
    pub recipient_id: Option<String>,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendFileMessageRequest {
    pub file_ref: String,
    pub file_name: String,
    pub file_type: String,
    pub group_id: Option<String>,
    pub recipient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
