//! # Documents
//!
//! Everything the service persists is a small JSON document in Redis (see
//! [`crate::database`] for the key layout). Profiles own their links, blocks,
//! and theme inline; there are no cross-document references apart from link
//! ids showing up in the per-link click counters.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Profile {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub theme: Theme,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(slug: String, display_name: String) -> Self {
        let now = Utc::now();

        Self {
            slug,
            display_name,
            bio: String::new(),
            avatar_url: None,
            published: false,
            links: Vec::new(),
            blocks: Vec::new(),
            theme: Theme::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn link(&self, id: Uuid) -> Option<&Link> {
        self.links.iter().find(|link| link.id == id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Link {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub label: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: BlockKind,
    #[serde(default)]
    pub body: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Heading,
    Text,
    Divider,
}

/// Theme is data handed to the frontend as-is; no styling happens server-side.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Theme {
    pub id: String,
    pub accent: String,
    pub background: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            id: "plain".to_string(),
            accent: "#1a1a1a".to_string(),
            background: "#ffffff".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContactMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::{BlockKind, Profile};

    #[test]
    fn test_profile_round_trip() {
        let profile = Profile::new("my-page".to_string(), "My Page".to_string());

        let json = serde_json::to_string(&profile).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();

        assert_eq!(back.slug, "my-page");
        assert_eq!(back.theme.id, "plain");
        assert!(!back.published);
    }

    #[test]
    fn test_link_defaults_from_sparse_json() {
        // An editor may post links without ids; we mint them on the way in.
        let json = r#"{
            "slug": "p",
            "display_name": "P",
            "links": [{"label": "Blog", "url": "https://example.com"}],
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;

        let profile: Profile = serde_json::from_str(json).unwrap();

        assert_eq!(profile.links.len(), 1);
        assert!(profile.links[0].enabled);
        assert!(!profile.links[0].id.is_nil());
    }

    #[test]
    fn test_block_kind_lowercase() {
        assert_eq!(serde_json::to_string(&BlockKind::Heading).unwrap(), "\"heading\"");

        let kind: BlockKind = serde_json::from_str("\"divider\"").unwrap();
        assert_eq!(kind, BlockKind::Divider);
    }
}
