//! User profile records mirrored from the backend.
//!
//! The backend owns the profile; the client keeps a single cached copy under
//! the `user` storage key (see [`crate::client::profile_cache`]). The cache is
//! overwritten wholesale on every successful fetch or local edit.

use serde::{Deserialize, Deserializer, Serialize};

/// A user's profile as returned by `GET /api/v1/users/me/profile`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend user identifier. Accepts both string and numeric ids.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Display name chosen by the user.
    #[serde(default)]
    pub name: Option<String>,

    /// Email address.
    #[serde(default)]
    pub email: Option<String>,

    /// Avatar URL.
    #[serde(default)]
    pub picture: Option<String>,

    /// Free-form biography.
    #[serde(default)]
    pub bio: Option<String>,

    /// Account status (e.g. "active", "banned").
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub updated_at: Option<String>,

    /// Whether the user finished the onboarding flow.
    #[serde(default)]
    pub is_onboarded: Option<bool>,

    /// Whether the user picked their interests during onboarding.
    #[serde(default)]
    pub has_selected_interests: Option<bool>,
}

impl UserProfile {
    /// Creates a profile with only an id.
    ///
    /// ```
    /// # use dxsession::UserProfile;
    /// let profile = UserProfile::new("42");
    /// assert_eq!(profile.id, "42");
    /// assert!(profile.email.is_none());
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns a display name for the user.
    ///
    /// Prefers the user's name, falls back to email, and finally to the id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }

    /// Returns the user's initials for avatar display.
    ///
    /// ```
    /// # use dxsession::UserProfile;
    /// let mut profile = UserProfile::new("7");
    /// profile.name = Some("Ada Lovelace".to_string());
    /// assert_eq!(profile.initials(), "AL");
    /// ```
    pub fn initials(&self) -> String {
        let source = self.display_name();
        let parts: Vec<&str> = source.split_whitespace().collect();
        match parts.as_slice() {
            [] => "??".to_string(),
            [single] => single.chars().take(2).collect::<String>().to_uppercase(),
            [first, second, ..] => {
                let a = first.chars().next().unwrap_or('?');
                let b = second.chars().next().unwrap_or('?');
                format!("{}{}", a, b).to_uppercase()
            }
        }
    }

    /// True when both onboarding steps are done.
    pub fn has_completed_onboarding(&self) -> bool {
        self.is_onboarded.unwrap_or(false) && self.has_selected_interests.unwrap_or(false)
    }

    /// Overlays `remote` onto `self`: remote fields win, local values survive
    /// only where the remote record leaves them empty.
    pub fn merged_with(&self, remote: UserProfile) -> UserProfile {
        UserProfile {
            id: remote.id,
            name: remote.name.or_else(|| self.name.clone()),
            email: remote.email.or_else(|| self.email.clone()),
            picture: remote.picture.or_else(|| self.picture.clone()),
            bio: remote.bio.or_else(|| self.bio.clone()),
            status: remote.status.or_else(|| self.status.clone()),
            created_at: remote.created_at.or_else(|| self.created_at.clone()),
            updated_at: remote.updated_at.or_else(|| self.updated_at.clone()),
            is_onboarded: remote.is_onboarded.or(self.is_onboarded),
            has_selected_interests: remote.has_selected_interests.or(self.has_selected_interests),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
