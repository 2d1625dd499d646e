use super::ChatService;
use crate::error::{ChatError, ChatResult};
use crate::events::ChangeEvent;
use crate::models::*;

/// Maximum number of users returned by a search
pub const SEARCH_LIMIT: usize = 10;

impl ChatService {
    pub fn current_user(&self, user_id: &str) -> ChatResult<CurrentUser> {
        let user = self.require_user(user_id)?;
        let profile = self.store.get_profile(user_id)?;
        let (nickname, photo_ref) = match profile {
            Some(p) => (p.nickname, p.profile_photo_ref),
            None => (None, None),
        };
        Ok(CurrentUser {
            id: user.id,
            name: user.name,
            email: user.email,
            nickname,
            profile_photo_url: photo_ref.as_deref().map(|r| self.blobs.url_for(r)),
            profile_photo_ref: photo_ref,
        })
    }

    /// Patch the caller's profile, creating it on first use.
    /// Omitted fields keep their current value.
    pub fn update_profile(
        &self,
        user_id: &str,
        nickname: Option<&str>,
        profile_photo_ref: Option<&str>,
    ) -> ChatResult<CurrentUser> {
        let nickname = match nickname.map(str::trim) {
            Some("") => return Err(ChatError::invalid("Nickname cannot be empty")),
            other => other,
        };

        if let Some(photo) = profile_photo_ref {
            self.require_own_image(user_id, photo)?;
        }

        self.store.upsert_profile(user_id, nickname, profile_photo_ref)?;

        self.publish(ChangeEvent::Profile {
            user_id: user_id.to_string(),
        });
        self.current_user(user_id)
    }

    /// Users whose nickname equals `query` exactly, excluding the caller
    pub fn search_users(&self, caller: &str, query: &str) -> ChatResult<Vec<UserSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self
            .store
            .find_profiles_by_nickname(query, SEARCH_LIMIT as i64 + 1)?;
        let ids = profiles
            .iter()
            .map(|p| p.user_id.as_str())
            .filter(|id| *id != caller)
            .take(SEARCH_LIMIT);
        self.summarize_ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::blob::BlobStore;

    #[test]
    fn test_search_excludes_caller() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        chat.update_profile(&a.id, Some("twin"), None).unwrap();
        chat.update_profile(&b.id, Some("twin"), None).unwrap();

        let found = chat.search_users(&a.id, "twin").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);
        assert!(chat.search_users(&a.id, "twi").unwrap().is_empty());
        assert!(chat.search_users(&a.id, "").unwrap().is_empty());
    }

    #[test]
    fn test_profile_photo_must_be_uploaded_image() {
        let chat = service();
        let a = user(&chat, "A");
        assert!(matches!(
            chat.update_profile(&a.id, None, Some("missing")),
            Err(ChatError::NotFound(_))
        ));

        let ticket = chat.blobs.create_upload(&a.id).unwrap();
        let pdf = chat
            .blobs
            .complete_upload(&ticket.token, "application/pdf", vec![1])
            .unwrap();
        assert!(matches!(
            chat.update_profile(&a.id, None, Some(pdf.as_str())),
            Err(ChatError::InvalidArgument(_))
        ));

        let ticket = chat.blobs.create_upload(&a.id).unwrap();
        let png = chat
            .blobs
            .complete_upload(&ticket.token, "image/png", vec![1])
            .unwrap();
        let me = chat.update_profile(&a.id, None, Some(png.as_str())).unwrap();
        assert_eq!(me.profile_photo_ref.as_deref(), Some(png.as_str()));
        assert!(me.profile_photo_url.unwrap().ends_with(&png));
    }

    #[test]
    fn test_profile_photo_must_be_own_upload() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let ticket = chat.blobs.create_upload(&b.id).unwrap();
        let png = chat
            .blobs
            .complete_upload(&ticket.token, "image/png", vec![1])
            .unwrap();
        assert!(matches!(
            chat.update_profile(&a.id, None, Some(png.as_str())),
            Err(ChatError::Forbidden(_))
        ));
    }

    #[test]
    fn test_blank_nickname_rejected() {
        let chat = service();
        let a = user(&chat, "A");
        assert!(matches!(
            chat.update_profile(&a.id, Some("  "), None),
            Err(ChatError::InvalidArgument(_))
        ));
        assert!(chat.current_user(&a.id).unwrap().nickname.is_none());
    }
}
