use futures_util::stream::{self, Stream};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use super::ChatService;
use crate::error::ChatResult;
use crate::events::{ChangeEvent, LiveQuery};
use crate::models::*;

/// Result of evaluating a LiveQuery; serializes as the bare list
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LiveResult {
    Messages(Vec<MessageView>),
    Users(Vec<UserSummary>),
    Requests(Vec<PendingRequest>),
    Groups(Vec<UserGroup>),
    Members(Vec<GroupMember>),
}

impl LiveResult {
    pub fn len(&self) -> usize {
        match self {
            LiveResult::Messages(v) => v.len(),
            LiveResult::Users(v) => v.len(),
            LiveResult::Requests(v) => v.len(),
            LiveResult::Groups(v) => v.len(),
            LiveResult::Members(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Watch {
    chat: Arc<ChatService>,
    caller: String,
    query: LiveQuery,
    rx: Receiver<ChangeEvent>,
    initial: Option<LiveResult>,
    done: bool,
}

impl ChatService {
    /// Run the read behind `query` exactly as the point-in-time endpoint does
    pub fn evaluate(&self, caller: &str, query: &LiveQuery) -> ChatResult<LiveResult> {
        Ok(match query {
            LiveQuery::GroupMessages { group_id } => {
                LiveResult::Messages(self.list_group_messages(caller, group_id, None)?)
            }
            LiveQuery::DirectMessages { other_user_id } => {
                LiveResult::Messages(self.list_direct_messages(caller, other_user_id, None)?)
            }
            LiveQuery::Friends => LiveResult::Users(self.list_friends(caller)?),
            LiveQuery::PendingRequests => LiveResult::Requests(self.list_pending_incoming(caller)?),
            LiveQuery::UserGroups => LiveResult::Groups(self.list_user_groups(caller)?),
            LiveQuery::GroupMembers { group_id } => {
                LiveResult::Members(self.list_members(caller, group_id)?)
            }
            LiveQuery::AddableFriends { group_id } => {
                LiveResult::Users(self.list_addable_friends(caller, group_id)?)
            }
        })
    }

    /// Evaluate `query` now and again after every change that affects it.
    ///
    /// The first evaluation happens before this returns, so authorization
    /// failures surface as an `Err` here. A later failure (for example after
    /// the caller was removed from the group) is yielded once and ends the
    /// stream. A lagging subscriber re-evaluates instead of failing.
    pub fn watch(
        self: &Arc<Self>,
        caller: &str,
        query: LiveQuery,
    ) -> ChatResult<impl Stream<Item = ChatResult<LiveResult>> + Send + 'static> {
        // Subscribe first so no change between evaluation and subscription is lost
        let rx = self.feed.subscribe();
        let initial = self.evaluate(caller, &query)?;

        let state = Watch {
            chat: Arc::clone(self),
            caller: caller.to_string(),
            query,
            rx,
            initial: Some(initial),
            done: false,
        };

        Ok(stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            if let Some(first) = st.initial.take() {
                return Some((Ok(first), st));
            }

            loop {
                match st.rx.recv().await {
                    Ok(event) => {
                        if !event.affects(&st.query, &st.caller) {
                            continue;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Live query for {} lagged by {} changes", st.caller, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }

                let result = st.chat.evaluate(&st.caller, &st.query);
                if result.is_err() {
                    st.done = true;
                }
                return Some((result, st));
            }
        }))
    }
}
