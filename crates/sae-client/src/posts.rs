//! Feed reads go through the `get_posts_with_details` procedure, which joins
//! authors, counts and the viewer's like in one round trip.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use sae_types::models::{NewPost, Post, PostAuthor, PostType, display_name};

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::{ClientError, ClientResult};
use crate::profiles::author_from_token;

pub const POSTS_PROCEDURE: &str = "get_posts_with_details";

#[derive(Serialize)]
struct PostsArgs {
    user_id_param: Option<Uuid>,
}

/// One row of the feed procedure.
#[derive(Debug, Deserialize)]
struct FeedRow {
    id: Uuid,
    user_id: Uuid,
    #[serde(rename = "type", default)]
    post_type: Option<PostType>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    image: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    likes_count: Option<i64>,
    #[serde(default)]
    comments_count: Option<i64>,
    #[serde(default)]
    liked_by_user: Option<bool>,
}

impl From<FeedRow> for Post {
    fn from(row: FeedRow) -> Self {
        Post {
            id: row.id,
            user: PostAuthor {
                id: row.user_id,
                name: display_name(
                    row.first_name.as_deref(),
                    row.last_name.as_deref(),
                    row.username.as_deref(),
                ),
                username: row.username,
                avatar: row.avatar_url,
            },
            post_type: row.post_type.unwrap_or(PostType::Post),
            content: row.content.unwrap_or_default(),
            link: row.link,
            image: row.image,
            created_at: row.created_at,
            likes_count: count(row.likes_count),
            comments_count: count(row.comments_count),
            liked_by_user: row.liked_by_user.unwrap_or(false),
            placeholder: false,
        }
    }
}

fn count(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

/// Row returned by an insert into `posts`.
#[derive(Debug, Deserialize)]
struct InsertedPost {
    id: Uuid,
    #[serde(rename = "type", default)]
    post_type: Option<PostType>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    image: Option<String>,
    created_at: DateTime<Utc>,
}

impl RestClient {
    /// Newest first, with `liked_by_user` computed for `viewer`.
    pub async fn get_posts(&self, viewer: Option<Uuid>) -> ClientResult<Vec<Post>> {
        let url = self.rpc_url(POSTS_PROCEDURE)?;
        let args = PostsArgs { user_id_param: viewer };
        let request = ApiRequest::new(Method::POST, url, Auth::Anon).json(&args)?;
        let rows: Vec<FeedRow> = self.execute(request).await?.rows()?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    pub async fn get_posts_by_user(
        &self,
        user_id: Uuid,
        viewer: Option<Uuid>,
    ) -> ClientResult<Vec<Post>> {
        let posts = self.get_posts(viewer).await?;
        Ok(posts.into_iter().filter(|p| p.user.id == user_id).collect())
    }

    pub async fn get_post(&self, id: Uuid, viewer: Option<Uuid>) -> ClientResult<Option<Post>> {
        let posts = self.get_posts(viewer).await?;
        Ok(posts.into_iter().find(|p| p.id == id))
    }

    /// Insert a post as the token's owner. The author block comes from the
    /// token, counts start at zero.
    pub async fn create_post(&self, new: &NewPost, token: &str) -> ClientResult<Post> {
        if new.content.trim().is_empty() && new.link.is_none() && new.image.is_none() {
            return Err(ClientError::Validation("post has no content".into()));
        }

        let url = self.table_url("posts", &[])?;
        let request = ApiRequest::write(Method::POST, url, Auth::user(token), new)?;
        let inserted: Option<InsertedPost> = self.execute(request).await?.first_row()?;
        let author = author_from_token(token, new.user_id);

        let post = match inserted {
            Some(row) => Post {
                id: row.id,
                user: author,
                post_type: row.post_type.unwrap_or(new.post_type),
                content: row.content.unwrap_or_else(|| new.content.clone()),
                link: row.link,
                image: row.image,
                created_at: row.created_at,
                likes_count: 0,
                comments_count: 0,
                liked_by_user: false,
                placeholder: false,
            },
            None => Post {
                id: Uuid::new_v4(),
                user: author,
                post_type: new.post_type,
                content: new.content.clone(),
                link: new.link.clone(),
                image: new.image.clone(),
                created_at: Utc::now(),
                likes_count: 0,
                comments_count: 0,
                liked_by_user: false,
                placeholder: true,
            },
        };
        let note = if post.placeholder { " (placeholder)" } else { "" };
        info!("created {} post {}{}", post.post_type, post.id, note);
        Ok(post)
    }

    pub async fn delete_post(&self, id: Uuid, token: &str) -> ClientResult<()> {
        let url = self.table_url("posts", &[("id", &eq(id))])?;
        self.execute(ApiRequest::new(Method::DELETE, url, Auth::user(token))).await?;
        Ok(())
    }
}
