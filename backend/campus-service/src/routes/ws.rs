use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::{PollOutcome, WsSession};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde_json::json;

/// Upgrade to a WebSocket carrying STOMP frames
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(state.sessions.clone(), state.websocket.clone());
    ws::start(session, &req, stream)
}

pub async fn open_poll(state: web::Data<AppState>) -> HttpResponse {
    let session_id = state.polling.open();
    HttpResponse::Created().json(json!({
        "session_id": session_id,
        "poll_timeout_secs": state.websocket.poll_timeout.as_secs(),
    }))
}

/// Submit one or more frames
pub async fn submit_frames(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: String,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    state
        .polling
        .submit(&session_id, &body)
        .await
        .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::NoContent().finish())
}

/// Long-poll for queued frames
pub async fn receive_frames(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let outcome = state
        .polling
        .poll(&session_id)
        .await
        .ok_or(AppError::NotFound)?;

    Ok(match outcome {
        PollOutcome::Frames(frames) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(frames),
        PollOutcome::Empty => HttpResponse::NoContent().finish(),
        PollOutcome::Closed => HttpResponse::Gone().finish(),
    })
}

pub async fn close_poll(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    if state.polling.remove(&path.into_inner()).await {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(AppError::NotFound)
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, endpoint: &str) {
    cfg.service(web::resource(endpoint).route(web::get().to(ws_handler)))
        .service(web::resource(format!("{endpoint}/poll")).route(web::post().to(open_poll)))
        .service(
            web::resource(format!("{endpoint}/poll/{{session_id}}"))
                .route(web::post().to(submit_frames))
                .route(web::get().to(receive_frames))
                .route(web::delete().to(close_poll)),
        );
}
