use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sae_types::models::{Comment, Profile};

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::{ClientError, ClientResult};
use crate::profiles::{author_from_profile, author_from_token};

const WITH_AUTHOR: &str = "*,profiles(id,username,first_name,last_name,avatar_url)";

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    user_id: Uuid,
    #[serde(default)]
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    profiles: Option<Profile>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            author: Some(author_from_profile(row.user_id, row.profiles.as_ref())),
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
            placeholder: false,
        }
    }
}

#[derive(Serialize)]
struct NewComment<'a> {
    post_id: Uuid,
    user_id: Uuid,
    content: &'a str,
}

impl RestClient {
    /// Oldest first, each with its author.
    pub async fn get_comments(&self, post_id: Uuid) -> ClientResult<Vec<Comment>> {
        let url = self.table_url(
            "comments",
            &[("post_id", &eq(post_id)), ("select", WITH_AUTHOR), ("order", "created_at.asc")],
        )?;
        let rows: Vec<CommentRow> = self.execute(ApiRequest::get(url, Auth::Anon)).await?.rows()?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    pub async fn create_comment(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        content: &str,
        token: &str,
    ) -> ClientResult<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("comment is empty".into()));
        }

        let url = self.table_url("comments", &[])?;
        let body = NewComment { post_id, user_id, content };
        let request = ApiRequest::write(Method::POST, url, Auth::user(token), &body)?;
        let row: Option<CommentRow> = self.execute(request).await?.first_row()?;
        let author = Some(author_from_token(token, user_id));

        Ok(match row {
            Some(row) => Comment {
                author,
                ..Comment::from(row)
            },
            None => Comment {
                id: Uuid::new_v4(),
                post_id,
                user_id,
                content: content.to_string(),
                created_at: Utc::now(),
                author,
                placeholder: true,
            },
        })
    }

    pub async fn delete_comment(&self, id: Uuid, token: &str) -> ClientResult<()> {
        let url = self.table_url("comments", &[("id", &eq(id))])?;
        self.execute(ApiRequest::new(Method::DELETE, url, Auth::user(token))).await?;
        Ok(())
    }
}
