use axum::{Json, extract::State};
use tracing::info;

use sae_types::api::DiagnosticsReport;

use crate::AppState;

/// Configuration presence plus two live probes: REST reachability and a
/// forged bot login that must come back 401.
pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsReport> {
    let client_config = state.client.config();
    let (rest_api, forged_login) =
        tokio::join!(state.client.health_check(), state.client.probe_forged_login());

    info!(
        "diagnostics: rest_api ok={} forged_login ok={}",
        rest_api.ok, forged_login.ok
    );
    Json(DiagnosticsReport {
        supabase_url_set: !client_config.supabase_url.is_empty(),
        anon_key_set: !client_config.anon_key.is_empty(),
        service_key_set: client_config.service_key.as_deref().is_some_and(|k| !k.is_empty()),
        telegram_function_url: client_config.telegram_function_url.clone(),
        rest_api,
        forged_login,
    })
}
