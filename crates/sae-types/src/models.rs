use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tokens plus the two bootstrap flags persisted for a browser tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub login_complete: bool,
    pub reload_pending: bool,
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// "First Last", falling back to the username and then to "Anonymous".
    pub fn display_name(&self) -> String {
        display_name(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.username.as_deref(),
        )
    }
}

pub fn display_name(first: Option<&str>, last: Option<&str>, username: Option<&str>) -> String {
    let full = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if !full.is_empty() {
        return full;
    }
    match username.map(str::trim) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => "Anonymous".to_string(),
    }
}

/// The signed-in user as the UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Author block embedded in posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAuthor {
    pub id: Uuid,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Idea,
    #[serde(alias = "started")]
    Launch,
    Progress,
    Fail,
    Link,
    #[serde(other)]
    Post,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Launch => "launch",
            Self::Progress => "progress",
            Self::Fail => "fail",
            Self::Link => "link",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed view model. Counts are always whatever the server last reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user: PostAuthor,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub content: String,
    pub link: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub likes_count: u64,
    pub comments_count: u64,
    pub liked_by_user: bool,
    /// Synthesized locally because the server returned no representation.
    #[serde(skip)]
    pub placeholder: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Lifecycle stage of a startup. Declaration order is the progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupStage {
    Idea,
    Planning,
    Building,
    Mvp,
    Beta,
    Launched,
    Scaling,
    Acquired,
    Paused,
}

impl StartupStage {
    pub const ALL: [StartupStage; 9] = [
        Self::Idea,
        Self::Planning,
        Self::Building,
        Self::Mvp,
        Self::Beta,
        Self::Launched,
        Self::Scaling,
        Self::Acquired,
        Self::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Mvp => "mvp",
            Self::Beta => "beta",
            Self::Launched => "launched",
            Self::Scaling => "scaling",
            Self::Acquired => "acquired",
            Self::Paused => "paused",
        }
    }

    /// The following stage, or `None` at the end of the progression.
    pub fn next(&self) -> Option<StartupStage> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl Default for StartupStage {
    fn default() -> Self {
        Self::Idea
    }
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Startup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub stage: StartupStage,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub placeholder: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStartup {
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub stage: StartupStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PostAuthor>,
    #[serde(skip)]
    pub placeholder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}
