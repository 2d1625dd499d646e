//! Chat core: relationships, groups and messages behind one authorization layer
//!
//! Every operation takes the acting user id explicitly. Preconditions are
//! checked in `policy` before the store is touched; each write is a single
//! store call (or one store transaction), and the affected ChangeEvents are
//! published after it commits.

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::error::ChatResult;
use crate::events::{ChangeEvent, ChangeFeed};
use crate::models::*;
use crate::store::Store;

mod groups;
mod live;
mod messages;
mod policy;
mod relationships;
mod users;

pub use live::LiveResult;

/// Default and maximum number of messages returned by a feed
pub const DEFAULT_PAGE_SIZE: i64 = 50;

pub struct ChatService {
    store: Arc<Store>,
    blobs: Arc<dyn BlobStore>,
    feed: ChangeFeed,
    page_size: i64,
}

impl ChatService {
    pub fn new(store: Arc<Store>, blobs: Arc<dyn BlobStore>, feed: ChangeFeed, page_size: i64) -> Self {
        Self {
            store,
            blobs,
            feed,
            page_size: page_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn publish(&self, event: ChangeEvent) {
        self.feed.publish(event);
    }

    /// Public projection of a user, with their profile applied
    fn summarize(&self, user: &User) -> ChatResult<UserSummary> {
        let profile = self.store.get_profile(&user.id)?;
        let (nickname, photo) = match profile {
            Some(p) => (p.nickname, p.profile_photo_ref),
            None => (None, None),
        };
        Ok(UserSummary {
            id: user.id.clone(),
            name: user.name.clone(),
            nickname,
            email: user.email.clone(),
            profile_photo_url: photo.map(|r| self.blobs.url_for(&r)),
        })
    }

    /// Summaries for a list of user ids; ids with no user row are skipped
    fn summarize_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> ChatResult<Vec<UserSummary>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(user) = self.store.find_user(id)? {
                out.push(self.summarize(&user)?);
            }
        }
        Ok(out)
    }

    /// Nickname, then account name, then the placeholder
    fn display_name_of(&self, user_id: &str) -> ChatResult<String> {
        let user = self.store.find_user(user_id)?;
        let profile = self.store.get_profile(user_id)?;
        Ok(display_name(
            profile.as_ref().and_then(|p| p.nickname.as_deref()),
            user.as_ref().map(|u| u.name.as_str()),
        ))
    }
}
