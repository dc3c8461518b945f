use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "messaging": services.messaging_enabled(),
        "active_streams": services.gateway.active_sessions(),
        "dropped_notifications": services.orders.dropped_notifications(),
    }))
}
