use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use sae_types::api::ToggleLikeResult;

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::ClientResult;

const COUNT_EXACT: &str = "count=exact";

#[derive(Serialize)]
struct NewLike {
    post_id: Uuid,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct LikeId {
    id: Uuid,
}

impl RestClient {
    /// Like the post if `user_id` has not, otherwise remove the like. The
    /// returned count is always re-read from the server.
    pub async fn toggle_like(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        token: &str,
    ) -> ClientResult<ToggleLikeResult> {
        let auth = Auth::user(token);
        let (post_filter, user_filter) = (eq(post_id), eq(user_id));

        let url = self.table_url(
            "likes",
            &[("post_id", &post_filter), ("user_id", &user_filter), ("select", "id")],
        )?;
        let existing: Option<LikeId> =
            self.execute(ApiRequest::get(url, auth.clone())).await?.first_row()?;

        let liked = match existing {
            Some(like) => {
                let id_filter = eq(like.id);
                let url =
                    self.table_url("likes", &[("id", &id_filter), ("user_id", &user_filter)])?;
                self.execute(ApiRequest::new(Method::DELETE, url, auth.clone())).await?;
                false
            }
            None => {
                let url = self.table_url("likes", &[])?;
                let like = NewLike { post_id, user_id };
                let request = ApiRequest::write(Method::POST, url, auth.clone(), &like)?;
                match self.execute(request).await {
                    Ok(_) => true,
                    // a concurrent toggle already inserted it
                    Err(e) if e.is_conflict() => {
                        warn!("like for post {} already exists: {}", post_id, e);
                        true
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let likes_count = self.count_likes(post_id, auth).await?;
        let verb = if liked { "liked" } else { "unliked" };
        info!("user {} {} post {} ({} likes)", user_id, verb, post_id, likes_count);
        Ok(ToggleLikeResult { liked, likes_count })
    }

    pub async fn likes_count(&self, post_id: Uuid) -> ClientResult<u64> {
        self.count_likes(post_id, Auth::Anon).await
    }

    async fn count_likes(&self, post_id: Uuid, auth: Auth) -> ClientResult<u64> {
        let url = self.table_url("likes", &[("post_id", &eq(post_id)), ("select", "id")])?;
        let raw = self.execute(ApiRequest::get(url, auth).prefer(COUNT_EXACT)).await?;
        match raw.total_count() {
            Some(total) => Ok(total),
            None => Ok(raw.rows::<LikeId>()?.len() as u64),
        }
    }
}
