use actix_web::web;

pub mod auth;
pub mod chat;
pub mod users;
pub mod ws;

async fn health_check() -> &'static str {
    "OK"
}

/// Register every HTTP route. `socket_endpoint` is the STOMP endpoint path.
pub fn configure(cfg: &mut web::ServiceConfig, socket_endpoint: &str) {
    cfg.route("/health", web::get().to(health_check));
    auth::configure(cfg);
    users::configure(cfg);
    chat::configure(cfg);
    ws::configure(cfg, socket_endpoint);
}
