use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::{check_health, StoreChecker, CHECK_TIMEOUT};
use crate::AppState;

/// 200 when every dependency answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = StoreChecker::new(state.store.clone());
    let response = check_health(&[&store], state.start_time, CHECK_TIMEOUT).await;

    let status_code = if response.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
