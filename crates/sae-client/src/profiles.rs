use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use sae_session::token::{TokenClaims, decode_claims, is_token_expired};
use sae_types::models::{PostAuthor, Profile, User, display_name};

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::{ClientError, ClientResult};

const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

impl RestClient {
    pub async fn get_profile(&self, id: Uuid) -> ClientResult<Option<Profile>> {
        let url = self.table_url("profiles", &[("id", &eq(id)), ("select", "*")])?;
        self.execute(ApiRequest::get(url, Auth::Anon)).await?.first_row()
    }

    pub async fn get_profile_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> ClientResult<Option<Profile>> {
        let filter = eq(telegram_id);
        let url = self.table_url("profiles", &[("telegram_id", &filter), ("select", "*")])?;
        self.execute(ApiRequest::get(url, Auth::Anon)).await?.first_row()
    }

    /// Insert or merge the row keyed by `profile.id`.
    pub async fn upsert_profile(&self, profile: &Profile, token: &str) -> ClientResult<Profile> {
        let url = self.table_url("profiles", &[("on_conflict", "id")])?;
        let request = ApiRequest::new(Method::POST, url, Auth::user(token))
            .json(profile)?
            .prefer(UPSERT_PREFER);

        let saved = self.execute(request).await?.first_row()?;
        Ok(saved.unwrap_or_else(|| profile.clone()))
    }

    /// The signed-in user: token claims merged with the `profiles` row.
    pub async fn current_user(&self, token: &str) -> ClientResult<User> {
        let claims = valid_claims(token)?;
        let id = claims
            .user_id()
            .ok_or_else(|| ClientError::AuthExpired("token has no subject".into()))?;

        let profile = self.get_profile(id).await?;
        if profile.is_none() {
            debug!("no profile row for {}, using token metadata", id);
        }
        Ok(merge_user(id, &claims, profile.as_ref()))
    }
}

fn valid_claims(token: &str) -> ClientResult<TokenClaims> {
    if token.trim().is_empty() {
        return Err(ClientError::Validation("missing access token".into()));
    }
    if is_token_expired(token) {
        return Err(ClientError::AuthExpired("access token expired".into()));
    }
    decode_claims(token)
        .ok_or_else(|| ClientError::AuthExpired("access token could not be decoded".into()))
}

fn merge_user(id: Uuid, claims: &TokenClaims, profile: Option<&Profile>) -> User {
    let pick = |from_profile: Option<&String>, field: &str| {
        from_profile.cloned().or_else(|| claims.metadata_str(field))
    };

    let first_name = pick(profile.and_then(|p| p.first_name.as_ref()), "first_name");
    let last_name = pick(profile.and_then(|p| p.last_name.as_ref()), "last_name");
    let username = pick(profile.and_then(|p| p.username.as_ref()), "username");
    let avatar = pick(profile.and_then(|p| p.avatar_url.as_ref()), "avatar_url")
        .or_else(|| claims.metadata_str("photo_url"));

    User {
        id,
        name: display_name(first_name.as_deref(), last_name.as_deref(), username.as_deref()),
        username,
        avatar,
        first_name,
        last_name,
    }
}

/// Author block for a record this token's owner just created.
pub(crate) fn author_from_token(token: &str, fallback_id: Uuid) -> PostAuthor {
    let claims = decode_claims(token);
    let id = claims.as_ref().and_then(TokenClaims::user_id).unwrap_or(fallback_id);
    let meta = |field: &str| claims.as_ref().and_then(|c| c.metadata_str(field));

    let username = meta("username");
    PostAuthor {
        id,
        name: display_name(
            meta("first_name").as_deref(),
            meta("last_name").as_deref(),
            username.as_deref(),
        ),
        username,
        avatar: meta("avatar_url").or_else(|| meta("photo_url")),
    }
}

pub(crate) fn author_from_profile(user_id: Uuid, profile: Option<&Profile>) -> PostAuthor {
    match profile {
        Some(p) => PostAuthor {
            id: p.id,
            name: p.display_name(),
            username: p.username.clone(),
            avatar: p.avatar_url.clone(),
        },
        None => PostAuthor {
            id: user_id,
            name: display_name(None, None, None),
            username: None,
            avatar: None,
        },
    }
}
