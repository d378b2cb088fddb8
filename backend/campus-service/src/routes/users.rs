use crate::error::AppError;
use crate::state::AppState;
use actix_middleware::AuthenticatedUser;
use actix_web::{get, web, HttpResponse};

/// Profile of the bearer-token holder
#[get("/api/users/me")]
pub async fn me(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let profile = state
        .users
        .find_by_email(&user.email)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(profile))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(me);
}
