use crate::model::Id;
use serde::{Deserialize, Serialize};

pub const USER_HANDLE_MAX_LEN: usize = 50;
pub const DISPLAY_NAME_MAX_LEN: usize = 255;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// The public summary of a user, embedded wherever something has an author.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
    pub display_name: DisplayName,
    #[serde(default)]
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateUser {
    pub handle: UserHandle,
    pub display_name: DisplayName,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct UserProfile {
    pub user: User,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
}

/// Changes a user makes to their own profile.
///
/// Absent fields are left alone. An empty bio or avatar URL clears it.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<DisplayName>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, user: &mut User) {
        fn non_blank(value: &str) -> Option<String> {
            (!value.trim().is_empty()).then(|| value.to_owned())
        }

        if let Some(display_name) = &self.display_name {
            user.display_name = display_name.clone();
        }
        if let Some(bio) = &self.bio {
            user.bio = non_blank(bio);
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = non_blank(avatar_url);
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct FollowState {
    pub following: bool,
    pub followers_count: i64,
}

validated_string!(
    /// A unique, non-empty handle without whitespace.
    UserHandle,
    InvalidUserHandleError,
    "The user handle is invalid: {0}",
    |handle| {
        let len = handle.chars().count();
        len > 0 && len <= USER_HANDLE_MAX_LEN && !handle.chars().any(char::is_whitespace)
    }
);

validated_string!(
    DisplayName,
    InvalidDisplayNameError,
    "The display name is invalid: {0}",
    |name| !name.trim().is_empty() && name.chars().count() <= DISPLAY_NAME_MAX_LEN
);

#[cfg(test)]
mod tests {
    use crate::model::user::{
        DisplayName, ProfileUpdate, USER_HANDLE_MAX_LEN, User, UserHandle,
    };

    #[test]
    fn handle_validation() {
        assert!(UserHandle::new("alice".to_owned()).is_ok());
        assert!(UserHandle::new(String::new()).is_err());
        assert!(UserHandle::new("al ice".to_owned()).is_err());
        assert!(UserHandle::new("a".repeat(USER_HANDLE_MAX_LEN)).is_ok());
        assert!(UserHandle::new("a".repeat(USER_HANDLE_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn handle_deserialization_is_checked() {
        assert!(serde_json::from_str::<UserHandle>("\"bob\"").is_ok());
        assert!(serde_json::from_str::<UserHandle>("\"\"").is_err());
    }

    #[test]
    fn display_name_rejects_blank() {
        assert!(DisplayName::new("Alice Liddell".to_owned()).is_ok());
        assert!(DisplayName::new("   ".to_owned()).is_err());
    }

    #[test]
    fn profile_update_keeps_absent_fields() {
        let mut user = User {
            id: 7.into(),
            handle: UserHandle::new("alice".to_owned()).unwrap(),
            display_name: DisplayName::new("Alice".to_owned()).unwrap(),
            bio: Some("Down the rabbit hole".to_owned()),
            avatar_url: Some("https://avatars.example/alice.png".to_owned()),
        };

        let update: ProfileUpdate = serde_json::from_str(r#"{"display_name":"Alice L."}"#).unwrap();
        update.apply(&mut user);
        assert_eq!(user.display_name.get(), "Alice L.");
        assert_eq!(user.bio.as_deref(), Some("Down the rabbit hole"));

        let update: ProfileUpdate =
            serde_json::from_str(r#"{"bio":"Through the looking glass","avatar_url":""}"#)
                .unwrap();
        update.apply(&mut user);
        assert_eq!(user.bio.as_deref(), Some("Through the looking glass"));
        assert_eq!(user.avatar_url, None);
        assert_eq!(user.handle.get(), "alice");

        assert!(serde_json::from_str::<ProfileUpdate>(r#"{"display_name":" "}"#).is_err());
    }
}
