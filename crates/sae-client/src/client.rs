//! Core request plumbing shared by every resource module

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client as HttpClient, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use sae_session::{Deduplicator, RequestKey};

use crate::auth::Auth;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

const PREFER_REPRESENTATION: &str = "return=representation";
const RPC_PREFIX: &str = "/rest/v1/rpc/";

/// What came back from the server, before any status check.
///
/// Cloned to every caller that joined the same request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub content_range: Option<String>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rows in the body; an empty body counts as no rows.
    pub fn rows<T: DeserializeOwned>(&self) -> ClientResult<Vec<T>> {
        let body = self.body.trim();
        if body.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(body)?)
    }

    pub fn first_row<T: DeserializeOwned>(&self) -> ClientResult<Option<T>> {
        Ok(self.rows()?.into_iter().next())
    }

    /// Total from `Content-Range: 0-4/5` (or `*/0`).
    pub fn total_count(&self) -> Option<u64> {
        parse_content_range(self.content_range.as_deref()?)
    }
}

pub(crate) fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// One outgoing call.
pub(crate) struct ApiRequest {
    method: Method,
    url: Url,
    auth: Auth,
    body: Option<String>,
    prefer: Option<&'static str>,
}

impl ApiRequest {
    pub(crate) fn new(method: Method, url: Url, auth: Auth) -> Self {
        Self {
            method,
            url,
            auth,
            body: None,
            prefer: None,
        }
    }

    pub(crate) fn get(url: Url, auth: Auth) -> Self {
        Self::new(Method::GET, url, auth)
    }

    /// Insert or update that asks for the written rows back.
    pub(crate) fn write<B: Serialize>(
        method: Method,
        url: Url,
        auth: Auth,
        body: &B,
    ) -> ClientResult<Self> {
        Ok(Self::new(method, url, auth).json(body)?.prefer(PREFER_REPRESENTATION))
    }

    pub(crate) fn json<B: Serialize>(mut self, body: &B) -> ClientResult<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    pub(crate) fn prefer(mut self, prefer: &'static str) -> Self {
        self.prefer = Some(prefer);
        self
    }

    fn key(&self) -> RequestKey {
        let scope = format!("{}|{}", self.auth.scope(), self.prefer.unwrap_or_default());
        RequestKey::new(self.method.as_str(), self.url.as_str(), self.body.as_deref())
            .with_scope(scope)
    }
}

/// REST client for the hosted database and its auth service.
///
/// Cheap to clone; clones share the HTTP pool and the request deduplicator.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<RestClientInner>,
}

struct RestClientInner {
    http: HttpClient,
    config: ClientConfig,
    dedup: Deduplicator<ClientResult<RawResponse>>,
}

impl RestClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Self::with_deduplicator(config, Deduplicator::default())
    }

    pub fn with_deduplicator(
        config: ClientConfig,
        dedup: Deduplicator<ClientResult<RawResponse>>,
    ) -> ClientResult<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("sae-client/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(RestClientInner { http, config, dedup }),
        })
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Number of requests currently held by the deduplicator.
    pub fn cached_requests(&self) -> usize {
        self.inner.dedup.len()
    }

    pub(crate) fn table_url(&self, table: &str, params: &[(&str, &str)]) -> ClientResult<Url> {
        build_url(&format!("{}/{}", self.inner.config.rest_base(), table), params)
    }

    pub(crate) fn rpc_url(&self, function: &str) -> ClientResult<Url> {
        build_url(&format!("{}/rpc/{}", self.inner.config.rest_base(), function), &[])
    }

    pub(crate) fn auth_url(&self, path: &str, params: &[(&str, &str)]) -> ClientResult<Url> {
        build_url(&format!("{}/{}", self.inner.config.auth_base(), path), params)
    }

    pub(crate) fn function_url(&self) -> ClientResult<Url> {
        build_url(&self.inner.config.telegram_function_url, &[])
    }

    /// Send and require a 2xx status.
    pub(crate) async fn execute(&self, request: ApiRequest) -> ClientResult<RawResponse> {
        let method = request.method.clone();
        let path = request.url.path().to_string();
        let raw = self.execute_raw(request).await?;

        if raw.is_success() {
            return Ok(raw);
        }
        let err = ClientError::from_response(raw.status, &raw.body);
        error!("{} {} failed: {}", method, path, err);
        Err(err)
    }

    /// Send through the deduplicator and return whatever status came back.
    pub(crate) async fn execute_raw(&self, request: ApiRequest) -> ClientResult<RawResponse> {
        let key = request.key();
        let path = key.path().to_string();
        let mutation = request.method != Method::GET && !path.starts_with(RPC_PREFIX);

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.auth.headers(&self.inner.config)?);
        if let Some(prefer) = request.prefer {
            builder = builder.header("Prefer", prefer);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }

        let failed_key = key.clone();
        let shared = self.inner.dedup.run(key, move || async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let content_range = response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await?;
            Ok::<_, ClientError>(RawResponse {
                status,
                body,
                content_range,
            })
        })?;

        let raw = match shared.await {
            Ok(raw) => raw,
            Err(e) => {
                // transport failures are retried by the next caller, not replayed
                self.inner.dedup.invalidate_where(|k| *k == failed_key);
                error!("{} {} failed: {}", request.method, path, e);
                return Err(match e {
                    ClientError::Timeout(_) => {
                        ClientError::Timeout(self.inner.config.request_timeout)
                    }
                    other => other,
                });
            }
        };
        debug!("{} {} -> {}", request.method, path, raw.status);

        if mutation {
            // completed writes must not be replayed, and reads of the table or
            // any procedure may be stale now
            let dropped = self
                .inner
                .dedup
                .invalidate_where(|k| k.path() == path || k.path().starts_with(RPC_PREFIX));
            if dropped > 0 {
                debug!("invalidated {} cached requests after writing {}", dropped, path);
            }
        }
        Ok(raw)
    }
}

fn build_url(base: &str, params: &[(&str, &str)]) -> ClientResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::Config(format!("invalid url {}: {}", base, e)))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// PostgREST equality filter value.
pub(crate) fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range("0-4/5"), Some(5));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-4/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn empty_body_has_no_rows() {
        let raw = RawResponse {
            status: 201,
            body: "  ".into(),
            content_range: None,
        };
        assert!(raw.rows::<serde_json::Value>().unwrap().is_empty());

        let raw = RawResponse {
            status: 201,
            body: "[]".into(),
            content_range: None,
        };
        assert!(raw.first_row::<serde_json::Value>().unwrap().is_none());
    }

    #[test]
    fn urls_carry_filters() {
        let client = RestClient::new(ClientConfig::new("https://abc.supabase.co", "anon")).unwrap();
        let url = client.table_url("likes", &[("post_id", "eq.7"), ("select", "id")]).unwrap();
        assert_eq!(url.as_str(), "https://abc.supabase.co/rest/v1/likes?post_id=eq.7&select=id");
        assert_eq!(
            client.rpc_url("get_posts_with_details").unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/rpc/get_posts_with_details"
        );
        assert!(client.table_url("posts", &[]).unwrap().query().is_none());
    }

    #[test]
    fn scope_separates_identities() {
        let url = Url::parse("https://abc.supabase.co/rest/v1/posts").unwrap();
        let anon = ApiRequest::get(url.clone(), Auth::Anon).key();
        let user = ApiRequest::get(url, Auth::user("t")).key();
        assert_ne!(anon, user);
        assert_eq!(anon.path(), user.path());
    }
}
