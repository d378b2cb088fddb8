use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde_json::json;

/// Principals with at least one open socket or polling session
#[get("/api/chat/online")]
pub async fn online_users(state: web::Data<AppState>) -> HttpResponse {
    let broker = state.broker();
    HttpResponse::Ok().json(json!({
        "users": broker.connected_users(),
        "sessions": broker.session_count(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(online_users);
}
