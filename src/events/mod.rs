//! Change notification for live queries
//!
//! Events are ephemeral: every committed mutation publishes the change kinds it
//! touched, and subscribers decide whether their query needs re-evaluating.
//! Nothing is stored and results are never patched incrementally.
//!
//! Flow: mutation commits -> ChangeEvent published -> LiveQuery re-evaluated

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ChatError, ChatResult};

const DEFAULT_CAPACITY: usize = 256;

/// What changed, keyed by the ids a read depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A direct message between `a` and `b` was sent, edited or deleted
    DirectMessages { a: String, b: String },
    GroupMessages { group_id: String },
    /// Friend or block edges touching these users changed
    Relationships { users: Vec<String> },
    /// Membership of a group changed; `users` is the roster before and after
    GroupRoster { group_id: String, users: Vec<String> },
    /// Nickname or photo of a user changed
    Profile { user_id: String },
}

/// A read operation that can be watched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum LiveQuery {
    GroupMessages { group_id: String },
    DirectMessages { other_user_id: String },
    Friends,
    PendingRequests,
    UserGroups,
    GroupMembers { group_id: String },
    AddableFriends { group_id: String },
}

impl LiveQuery {
    /// Build a query from its wire name and optional parameters
    pub fn from_params(
        kind: &str,
        group_id: Option<String>,
        other_user_id: Option<String>,
    ) -> ChatResult<Self> {
        let require = |value: Option<String>, name: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ChatError::invalid(format!("{} is required for {}", name, kind)))
        };

        match kind {
            "group_messages" => Ok(LiveQuery::GroupMessages {
                group_id: require(group_id, "group_id")?,
            }),
            "direct_messages" => Ok(LiveQuery::DirectMessages {
                other_user_id: require(other_user_id, "other_user_id")?,
            }),
            "friends" => Ok(LiveQuery::Friends),
            "pending_requests" => Ok(LiveQuery::PendingRequests),
            "user_groups" => Ok(LiveQuery::UserGroups),
            "group_members" => Ok(LiveQuery::GroupMembers {
                group_id: require(group_id, "group_id")?,
            }),
            "addable_friends" => Ok(LiveQuery::AddableFriends {
                group_id: require(group_id, "group_id")?,
            }),
            other => Err(ChatError::invalid(format!("Unknown live query: {}", other))),
        }
    }
}

impl ChangeEvent {
    /// True if `query`, run as `caller`, may return a different result after this change.
    pub fn affects(&self, query: &LiveQuery, caller: &str) -> bool {
        match (self, query) {
            (ChangeEvent::GroupMessages { group_id }, LiveQuery::GroupMessages { group_id: q }) => {
                group_id == q
            }
            (ChangeEvent::DirectMessages { a, b }, LiveQuery::DirectMessages { other_user_id }) => {
                (a == caller && b == other_user_id) || (b == caller && a == other_user_id)
            }

            (ChangeEvent::Relationships { users }, LiveQuery::Friends)
            | (ChangeEvent::Relationships { users }, LiveQuery::PendingRequests)
            | (ChangeEvent::Relationships { users }, LiveQuery::AddableFriends { .. }) => {
                users.iter().any(|u| u == caller)
            }

            // Losing membership turns a message feed into a Forbidden result
            (ChangeEvent::GroupRoster { group_id, .. }, LiveQuery::GroupMessages { group_id: q })
            | (ChangeEvent::GroupRoster { group_id, .. }, LiveQuery::GroupMembers { group_id: q })
            | (ChangeEvent::GroupRoster { group_id, .. }, LiveQuery::AddableFriends { group_id: q }) => {
                group_id == q
            }
            (ChangeEvent::GroupRoster { users, .. }, LiveQuery::UserGroups) => {
                users.iter().any(|u| u == caller)
            }

            // Display names and photo URLs appear in every user-bearing result
            (ChangeEvent::Profile { .. }, LiveQuery::UserGroups) => false,
            (ChangeEvent::Profile { .. }, _) => true,

            _ => false,
        }
    }
}

/// Fan-out channel carrying ChangeEvents to every live subscriber
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // Err only means nobody is listening
        if self.tx.send(event).is_err() {
            log::trace!("Change published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
