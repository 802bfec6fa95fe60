mod common;

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use sae_client::ClientError;
use sae_session::token::is_token_expired;
use sae_session::token_store::{ACCESS_TOKEN_KEY, RELOAD_PENDING_KEY};
use sae_session::{SessionError, SessionManager, SessionState, StorageBus, TokenStore};
use sae_store::{MemoryStore, StorageBackend};
use sae_types::api::TelegramAuthPayload;
use sae_types::models::Session;

use common::{FakeDb, GOOD_REFRESH, VALID_HASH, hits, mint_token, spawn};

fn payload(hash: &str) -> TelegramAuthPayload {
    TelegramAuthPayload {
        id: 424242,
        first_name: "Ada".into(),
        last_name: None,
        username: Some("ada".into()),
        photo_url: None,
        auth_date: chrono::Utc::now().timestamp(),
        hash: hash.into(),
    }
}

fn store() -> TokenStore {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStore::new());
    TokenStore::new(backend, StorageBus::new())
}

#[tokio::test]
async fn valid_widget_payload_logs_in() {
    let (client, _db) = spawn(FakeDb::default()).await;

    let tokens = client.login_with_telegram(&payload(VALID_HASH)).await.unwrap();
    assert!(!is_token_expired(&tokens.access_token));
    assert_eq!(tokens.refresh_token, "fresh-refresh");
}

#[tokio::test]
async fn forged_payload_is_rejected_with_401() {
    let (client, db) = spawn(FakeDb::default()).await;

    let err = client.login_with_telegram(&payload("invalid")).await.unwrap_err();
    assert!(matches!(err, ClientError::LoginRejected { status: 401, .. }));

    let probe = client.probe_forged_login().await;
    assert!(probe.ok, "{}", probe.detail);
    assert_eq!(probe.status, Some(401));
    assert_eq!(hits(&db, "telegram-auth"), 2);
}

#[tokio::test]
async fn refresh_exchanges_a_good_token() {
    let (client, _db) = spawn(FakeDb::default()).await;

    let tokens = client.refresh_session(GOOD_REFRESH).await.unwrap();
    assert_eq!(tokens.refresh_token, "rotated-refresh");

    let err = client.refresh_session("revoked").await.unwrap_err();
    assert!(matches!(err, ClientError::AuthExpired(_)));
    assert!(err.is_auth_error());
}

#[tokio::test]
async fn session_manager_refreshes_through_the_client() {
    let (client, db) = spawn(FakeDb::default()).await;
    let store = store();
    store.save_session(&Session {
        access_token: mint_token(Uuid::new_v4(), -60, json!({})),
        refresh_token: GOOD_REFRESH.into(),
        login_complete: true,
        reload_pending: false,
    });

    let manager = SessionManager::new(store.clone(), Arc::new(client));
    let (a, b) = tokio::join!(manager.get_valid_token(), manager.get_valid_token());

    let token = a.unwrap();
    assert_eq!(token, b.unwrap());
    assert!(!is_token_expired(&token));
    assert_eq!(store.get_item(ACCESS_TOKEN_KEY).as_deref(), Some(token.as_str()));
    assert_eq!(manager.state(), SessionState::Valid);
    assert_eq!(hits(&db, "refresh"), 1);
}

#[tokio::test]
async fn revoked_refresh_token_fails_the_session() {
    let (client, _db) = spawn(FakeDb::default()).await;
    let store = store();
    store.save_session(&Session {
        access_token: mint_token(Uuid::new_v4(), -60, json!({})),
        refresh_token: "revoked".into(),
        login_complete: true,
        reload_pending: false,
    });

    let manager = SessionManager::new(store.clone(), Arc::new(client));
    let err = manager.get_valid_token().await.unwrap_err();

    assert!(matches!(err, SessionError::RefreshFailed(_)));
    assert_eq!(manager.state(), SessionState::Failed);
    assert!(store.get_flag(RELOAD_PENDING_KEY));
}
