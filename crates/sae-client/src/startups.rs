use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use sae_types::models::{NewStartup, Startup, StartupStage};

use crate::auth::Auth;
use crate::client::{ApiRequest, RestClient, eq};
use crate::error::{ClientError, ClientResult};
use crate::slug::{slugify, unique_suffix};

/// Unique constraint on `startups.slug`.
pub const SLUG_CONSTRAINT: &str = "startups_slug_key";

#[derive(Serialize)]
struct StartupInsert<'a> {
    #[serde(flatten)]
    startup: &'a NewStartup,
    slug: &'a str,
}

#[derive(Serialize)]
struct StageUpdate {
    stage: StartupStage,
    updated_at: DateTime<Utc>,
}

fn is_slug_conflict(err: &ClientError) -> bool {
    err.is_conflict() || err.mentions(SLUG_CONSTRAINT)
}

impl RestClient {
    /// Newest first.
    pub async fn get_startups(&self) -> ClientResult<Vec<Startup>> {
        let url = self.table_url("startups", &[("select", "*"), ("order", "created_at.desc")])?;
        self.execute(ApiRequest::get(url, Auth::Anon)).await?.rows()
    }

    pub async fn get_startup_by_slug(&self, slug: &str) -> ClientResult<Option<Startup>> {
        let url = self.table_url("startups", &[("slug", &eq(slug)), ("select", "*")])?;
        self.execute(ApiRequest::get(url, Auth::Anon)).await?.first_row()
    }

    pub async fn get_startups_by_user(&self, user_id: Uuid) -> ClientResult<Vec<Startup>> {
        let url = self.table_url(
            "startups",
            &[("user_id", &eq(user_id)), ("select", "*"), ("order", "created_at.desc")],
        )?;
        self.execute(ApiRequest::get(url, Auth::Anon)).await?.rows()
    }

    /// Insert with a slug derived from the name. A taken slug is retried once
    /// with a random suffix; a second conflict is returned.
    pub async fn create_startup(&self, new: &NewStartup, token: &str) -> ClientResult<Startup> {
        if new.name.trim().is_empty() {
            return Err(ClientError::Validation("startup name is required".into()));
        }

        let slug = slugify(&new.name);
        match self.insert_startup(new, &slug, token).await {
            Err(e) if is_slug_conflict(&e) => {
                let retry = format!("{}{}", slug, unique_suffix());
                warn!("slug {} is taken, retrying as {}", slug, retry);
                self.insert_startup(new, &retry, token).await
            }
            other => other,
        }
    }

    async fn insert_startup(
        &self,
        new: &NewStartup,
        slug: &str,
        token: &str,
    ) -> ClientResult<Startup> {
        let url = self.table_url("startups", &[])?;
        let body = StartupInsert { startup: new, slug };
        let request = ApiRequest::write(Method::POST, url, Auth::user(token), &body)?;

        let startup = match self.execute(request).await?.first_row::<Startup>()? {
            Some(startup) => startup,
            None => Startup {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                name: new.name.clone(),
                slug: slug.to_string(),
                description: new.description.clone(),
                website: new.website.clone(),
                logo_url: new.logo_url.clone(),
                stage: new.stage,
                created_at: Utc::now(),
                updated_at: None,
                placeholder: true,
            },
        };
        info!("created startup {} ({})", startup.slug, startup.id);
        Ok(startup)
    }

    pub async fn update_startup_stage(
        &self,
        id: Uuid,
        stage: StartupStage,
        token: &str,
    ) -> ClientResult<Startup> {
        let url = self.table_url("startups", &[("id", &eq(id))])?;
        let body = StageUpdate {
            stage,
            updated_at: Utc::now(),
        };
        let request = ApiRequest::write(Method::PATCH, url, Auth::user(token), &body)?;

        // row-level security turns someone else's row into zero updated rows
        self.execute(request)
            .await?
            .first_row()?
            .ok_or_else(|| ClientError::NotFound(format!("startup {} not found or not owned", id)))
    }
}
