//! In-process stand-in for the hosted REST API, auth service and login function.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use uuid::Uuid;

use sae_client::{ClientConfig, RestClient};

pub const VALID_HASH: &str = "valid-hash";
pub const GOOD_REFRESH: &str = "good-refresh";

#[derive(Default)]
pub struct FakeDb {
    pub likes: Vec<(Uuid, Uuid, Uuid)>,
    pub slugs: Vec<String>,
    pub posts: Vec<Value>,
    pub profiles: Vec<Value>,
    /// Answer inserts with an empty body, as a misconfigured `Prefer` would.
    pub empty_inserts: bool,
    pub hits: HashMap<String, usize>,
    pub last_auth: Option<String>,
}

pub type Db = Arc<Mutex<FakeDb>>;

impl FakeDb {
    fn hit(&mut self, route: &str, headers: &HeaderMap) {
        *self.hits.entry(route.to_string()).or_default() += 1;
        self.last_auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
}

pub fn hits(db: &Db, route: &str) -> usize {
    db.lock().unwrap().hits.get(route).copied().unwrap_or(0)
}

/// Start the fake on an ephemeral port and return a client pointed at it.
pub async fn spawn(db: FakeDb) -> (RestClient, Db) {
    let db = Arc::new(Mutex::new(db));
    let app = Router::new()
        .route("/rest/v1/", get(root))
        .route("/rest/v1/likes", get(list_likes).post(insert_like).delete(delete_like))
        .route("/rest/v1/startups", post(insert_startup))
        .route("/rest/v1/posts", post(insert_post))
        .route("/rest/v1/profiles", get(list_profiles))
        .route("/rest/v1/rpc/get_posts_with_details", post(posts_with_details))
        .route("/functions/v1/telegram-auth", post(telegram_auth))
        .route("/auth/v1/token", post(refresh_token))
        .with_state(db.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ClientConfig::new(format!("http://{}", addr), "anon-key");
    let client = RestClient::new(config).unwrap();
    (client, db)
}

pub fn mint_token(sub: Uuid, expires_in: i64, metadata: Value) -> String {
    let claims = json!({
        "sub": sub.to_string(),
        "exp": chrono::Utc::now().timestamp() + expires_in,
        "role": "authenticated",
        "user_metadata": metadata,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"fake-jwt-secret")).unwrap()
}

fn eq_filter(query: &HashMap<String, String>, column: &str) -> Option<Uuid> {
    query.get(column)?.strip_prefix("eq.")?.parse().ok()
}

fn conflict(constraint: &str) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "code": "23505",
            "message": format!("duplicate key value violates unique constraint \"{}\"", constraint),
        })),
    )
        .into_response()
}

async fn root(State(db): State<Db>, headers: HeaderMap) -> Json<Value> {
    db.lock().unwrap().hit("root", &headers);
    Json(json!({"swagger": "2.0"}))
}

async fn list_likes(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut db = db.lock().unwrap();
    db.hit("GET likes", &headers);

    let post = eq_filter(&query, "post_id");
    let user = eq_filter(&query, "user_id");
    let rows: Vec<Value> = db
        .likes
        .iter()
        .filter(|(_, p, u)| post.is_none_or(|x| x == *p) && user.is_none_or(|x| x == *u))
        .map(|(id, _, _)| json!({"id": id}))
        .collect();

    let wants_count = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("count=exact"));
    if wants_count {
        let range = match rows.len() {
            0 => "*/0".to_string(),
            n => format!("0-{}/{}", n - 1, n),
        };
        return (StatusCode::OK, [("content-range", range)], Json(rows)).into_response();
    }
    Json(rows).into_response()
}

async fn insert_like(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut db = db.lock().unwrap();
    db.hit("POST likes", &headers);

    let post: Uuid = body["post_id"].as_str().and_then(|s| s.parse().ok()).unwrap();
    let user: Uuid = body["user_id"].as_str().and_then(|s| s.parse().ok()).unwrap();
    if db.likes.iter().any(|(_, p, u)| *p == post && *u == user) {
        return conflict("likes_post_id_user_id_key");
    }
    let id = Uuid::new_v4();
    db.likes.push((id, post, user));
    let row = json!({"id": id, "post_id": post, "user_id": user, "created_at": chrono::Utc::now()});
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn delete_like(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> StatusCode {
    let mut db = db.lock().unwrap();
    db.hit("DELETE likes", &headers);

    let id = eq_filter(&query, "id");
    let user = eq_filter(&query, "user_id");
    db.likes
        .retain(|(i, _, u)| !(id.is_none_or(|x| x == *i) && user.is_none_or(|x| x == *u)));
    StatusCode::NO_CONTENT
}

async fn insert_startup(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut db = db.lock().unwrap();
    db.hit("POST startups", &headers);

    let slug = body["slug"].as_str().unwrap_or_default().to_string();
    if db.slugs.contains(&slug) {
        return conflict("startups_slug_key");
    }
    db.slugs.push(slug.clone());
    if db.empty_inserts {
        return StatusCode::CREATED.into_response();
    }

    let mut row = body.clone();
    row["id"] = json!(Uuid::new_v4());
    row["created_at"] = json!(chrono::Utc::now());
    row["stage"] = body.get("stage").cloned().unwrap_or(json!("idea"));
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn insert_post(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut db = db.lock().unwrap();
    db.hit("POST posts", &headers);

    if db.empty_inserts {
        return StatusCode::CREATED.into_response();
    }
    let mut row = body;
    row["id"] = json!(Uuid::new_v4());
    row["created_at"] = json!(chrono::Utc::now());
    db.posts.push(row.clone());
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn list_profiles(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let mut db = db.lock().unwrap();
    db.hit("GET profiles", &headers);

    let id = query.get("id").and_then(|v| v.strip_prefix("eq.")).map(str::to_string);
    let rows: Vec<Value> = db
        .profiles
        .iter()
        .filter(|p| id.as_deref().is_none_or(|id| p["id"] == id))
        .cloned()
        .collect();
    Json(json!(rows))
}

async fn posts_with_details(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(args): Json<Value>,
) -> Json<Value> {
    let (posts, likes) = {
        let mut db = db.lock().unwrap();
        db.hit("rpc posts", &headers);
        (db.posts.clone(), db.likes.clone())
    };
    // slow enough for concurrent callers to overlap
    tokio::time::sleep(Duration::from_millis(50)).await;

    let viewer: Option<Uuid> = args["user_id_param"].as_str().and_then(|s| s.parse().ok());
    let rows: Vec<Value> = posts
        .into_iter()
        .map(|mut post| {
            let id: Uuid = post["id"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default();
            let post_likes: Vec<_> = likes.iter().filter(|(_, p, _)| *p == id).collect();
            post["likes_count"] = json!(post_likes.len());
            post["comments_count"] = json!(0);
            let liked = viewer.is_some_and(|v| post_likes.iter().any(|(_, _, u)| *u == v));
            post["liked_by_user"] = json!(liked);
            post
        })
        .collect();
    Json(json!(rows))
}

async fn telegram_auth(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    db.lock().unwrap().hit("telegram-auth", &headers);

    if payload["hash"] != VALID_HASH {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid hash"}))).into_response();
    }
    let user = Uuid::new_v4();
    Json(json!({
        "access_token": mint_token(user, 3600, json!({"first_name": payload["first_name"]})),
        "refresh_token": "fresh-refresh",
    }))
    .into_response()
}

async fn refresh_token(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    db.lock().unwrap().hit("refresh", &headers);

    if query.get("grant_type").map(String::as_str) != Some("refresh_token") {
        let body = json!({"error": "unsupported_grant_type"});
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }
    if body["refresh_token"] != GOOD_REFRESH {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Refresh Token Not Found",
            })),
        )
            .into_response();
    }
    Json(json!({
        "access_token": mint_token(Uuid::new_v4(), 3600, json!({})),
        "refresh_token": "rotated-refresh",
        "token_type": "bearer",
        "expires_in": 3600,
    }))
    .into_response()
}
