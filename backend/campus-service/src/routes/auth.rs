use crate::error::AppError;
use crate::models::{LoginRequest, RegisterRequest};
use crate::services::credentials;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};

pub const MIN_PASSWORD_LEN: usize = 8;

#[post("/api/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    let email = normalize_email(&req.email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = credentials::hash_password(&req.password, state.bcrypt_cost).await?;
    let role = req.role.unwrap_or_default();
    let user = state.users.create_user(&email, &hash, role).await?;

    tracing::info!(user_id = user.id, email = %user.email, role = %role, "user registered");
    Ok(HttpResponse::Created().json(user))
}

#[post("/api/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    let email = req.email.trim();

    let Some(user) = state.users.find_by_email(email).await? else {
        return Err(AppError::InvalidCredentials);
    };
    if !user.has_hashed_password() {
        tracing::warn!(
            user_id = user.id,
            "login refused: credential has not been migrated"
        );
        return Err(AppError::InvalidCredentials);
    }
    if !credentials::verify_password(&req.password, &user.password).await? {
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .keys
        .token_response(&user.email, Some(&user.role))
        .map_err(|e| {
            tracing::error!(error = %e, "failed to issue access token");
            AppError::Internal
        })?;

    tracing::info!(user_id = user.id, "user logged in");
    Ok(HttpResponse::Ok().json(token))
}

/// Trimmed, lowercased email, or `BadRequest` when it is not plausibly one
fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(AppError::BadRequest("Invalid email address".into()))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register).service(login);
}
