//! Accounts: authentication extractors, `/auth/*` and `/admin/users*`.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::{bad_request, forbidden, internal, not_found, unauthorized, ApiError};
use super::AppState;
use crate::auth;
use crate::models::{format_ts_iso, User};
use crate::store;

/// The authenticated, active user behind the request's bearer token.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized("Not authenticated"))?;

        let claims = auth::verify_token(&state.config.auth.token_secret, token, store::now_ts())
            .map_err(|e| unauthorized(format!("Could not validate credentials: {}", e)))?;

        let user = store::get_user(&state.pool, &claims.sub)
            .await?
            .ok_or_else(|| unauthorized("Could not validate credentials"))?;
        if !user.is_active {
            return Err(unauthorized("Inactive user"));
        }
        Ok(CurrentUser(user))
    }
}

/// A [`CurrentUser`] that is also an admin.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(forbidden(
                "Not enough permissions. Admin access required.",
            ));
        }
        Ok(AdminUser(user))
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_admin: user.is_admin,
            is_active: user.is_active,
            created_at: format_ts_iso(user.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.into(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), ApiError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(bad_request("A valid email address is required"));
    }
    if password.is_empty() {
        return Err(bad_request("password must not be empty"));
    }
    Ok(())
}

async fn hash(password: &str) -> Result<String, ApiError> {
    auth::hash_password_blocking(password)
        .await
        .map_err(|e| internal(format!("password hashing failed: {}", e)))
}

async fn verify(password: &str, stored: &str) -> Result<bool, ApiError> {
    auth::verify_password_blocking(password, stored)
        .await
        .map_err(|e| internal(format!("password verification failed: {}", e)))
}

async fn insert_user(state: &AppState, req: &CreateUserRequest, is_admin: bool) -> Result<User, ApiError> {
    validate_credentials(&req.email, &req.password)?;
    let email = req.email.trim();
    if store::get_user_by_email(&state.pool, email).await?.is_some() {
        return Err(bad_request("Email already registered"));
    }
    let hashed = hash(&req.password).await?;
    let user = store::create_user(
        &state.pool,
        email,
        &hashed,
        req.full_name.as_deref(),
        is_admin,
    )
    .await?;
    tracing::info!(user_id = %user.id, is_admin, "user created");
    Ok(user)
}

// ============ /auth ============

/// `POST /auth/register`. Self-registration never grants admin rights;
/// `is_admin` in the body is ignored here.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = insert_user(&state, &req, false).await?;
    Ok(Json(UserResponse::from(&user)))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// `POST /auth/token`.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = store::get_user_by_email(&state.pool, req.email.trim())
        .await?
        .ok_or_else(|| unauthorized("Incorrect email or password"))?;
    if !verify(&req.password, &user.hashed_password).await? {
        return Err(unauthorized("Incorrect email or password"));
    }
    if !user.is_active {
        return Err(unauthorized("Inactive user"));
    }

    let access_token = auth::issue_token(
        &state.config.auth.token_secret,
        &user.id,
        store::now_ts(),
        state.config.auth.token_ttl_minutes,
    );
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// `GET /auth/me`.
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

// ============ /admin/users ============

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Paging {
    pub fn resolve(&self) -> (i64, i64) {
        (
            self.skip.unwrap_or(0).max(0),
            self.limit.unwrap_or(100).clamp(1, 1000),
        )
    }
}

async fn load_user(state: &AppState, id: &str) -> Result<User, ApiError> {
    store::get_user(&state.pool, id)
        .await?
        .ok_or_else(|| not_found("User not found"))
}

pub async fn admin_list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(paging): Query<Paging>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let (skip, limit) = paging.resolve();
    let users = store::list_users(&state.pool, skip, limit).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

pub async fn admin_create_user(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = insert_user(&state, &req, req.is_admin).await?;
    Ok(Json(UserResponse::from(&user)))
}

#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_admin: Option<bool>,
    #[serde(default)]
    pub password: Option<String>,
}

pub async fn admin_update_user(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut user = load_user(&state, &id).await?;

    if let Some(full_name) = update.full_name {
        user.full_name = Some(full_name);
    }
    if let Some(is_active) = update.is_active {
        user.is_active = is_active;
    }
    if let Some(is_admin) = update.is_admin {
        user.is_admin = is_admin;
    }
    if let Some(password) = update.password {
        if password.is_empty() {
            return Err(bad_request("password must not be empty"));
        }
        user.hashed_password = hash(&password).await?;
    }

    store::update_user(&state.pool, &user).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn admin_delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = load_user(&state, &id).await?;
    if user.id == admin.id {
        return Err(bad_request("Cannot delete your own account"));
    }
    store::delete_user(&state.pool, &user.id).await?;
    tracing::info!(user_id = %user.id, "user deleted");
    Ok(message("User deleted successfully"))
}

#[derive(Debug, Serialize)]
pub struct ToggleAdminResponse {
    pub message: String,
    pub user: UserResponse,
}

pub async fn admin_toggle_admin(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ToggleAdminResponse>, ApiError> {
    let mut user = load_user(&state, &id).await?;
    if user.id == admin.id {
        return Err(bad_request("Cannot modify your own admin status"));
    }

    user.is_admin = !user.is_admin;
    store::update_user(&state.pool, &user).await?;

    let verb = if user.is_admin { "granted" } else { "revoked" };
    Ok(Json(ToggleAdminResponse {
        message: format!("User admin status {}", verb),
        user: UserResponse::from(&user),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PasswordReset {
    pub password: String,
}

pub async fn admin_reset_password(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<PasswordReset>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut user = load_user(&state, &id).await?;
    if req.password.is_empty() {
        return Err(bad_request("password must not be empty"));
    }
    user.hashed_password = hash(&req.password).await?;
    store::update_user(&state.pool, &user).await?;
    Ok(message("Password reset successfully"))
}
