//! Account and session handlers under `/auth`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::auth::{ClientInfo, SelfDescription, UsernameStatus};
use crate::errors::GatewayError;
use crate::metadata::store::Table;
use crate::server::bearer_token;
use crate::AppState;

/// Header carrying a freshly issued session ID.
pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    #[serde(default)]
    pub table: String,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    body.map(|Json(v)| v)
        .map_err(|e| GatewayError::Validation(e.body_text()))
}

/// `GET /auth/username?username=` -- availability check.
#[utoipa::path(
    get,
    path = "/auth/username",
    tag = "Auth",
    operation_id = "CheckUsername",
    params(("username" = String, Query, description = "Candidate username")),
    responses(
        (status = 200, description = "username available"),
        (status = 409, description = "username taken or forbidden")
    )
)]
pub async fn check_username(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsernameQuery>,
) -> Result<Response, GatewayError> {
    let response = match state.auth.check_username(&query.username).await? {
        UsernameStatus::Forbidden => (StatusCode::CONFLICT, "username forbidden"),
        UsernameStatus::Taken => (StatusCode::CONFLICT, "username taken"),
        UsernameStatus::Available => (StatusCode::OK, "username available"),
    };
    Ok(response.into_response())
}

/// `POST /auth/register`
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    operation_id = "Register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created"),
        (status = 400, description = "Missing field or username conflict"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let req = json_body(body)?;
    state
        .auth
        .register(&req.email, &req.password, &req.username)
        .await?;
    Ok((StatusCode::CREATED, "user created").into_response())
}

/// `POST /auth/login` -- returns the session ID as the body and in
/// `X-Session-ID`.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    operation_id = "Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session ID"),
        (status = 401, description = "Invalid credentials"),
        (status = 404, description = "User not found")
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let req = json_body(body)?;
    let client = ClientInfo {
        agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        ip: connect_info.map(|ConnectInfo(addr)| addr.ip()),
    };

    let session_id = state.auth.login(&req.email, &req.password, client).await?;
    Ok((
        StatusCode::OK,
        [(SESSION_ID_HEADER, session_id.clone())],
        session_id,
    )
        .into_response())
}

/// `POST /auth/logout` -- revokes the bearer session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    operation_id = "Logout",
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Missing or malformed bearer header")
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let session_id = bearer_token(&headers).ok_or(GatewayError::Unauthorized)?;
    state.auth.logout(session_id).await?;
    Ok((StatusCode::OK, "logout success").into_response())
}

/// `GET /auth/me?session_id=`
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    operation_id = "DescribeSelf",
    params(("session_id" = String, Query, description = "Caller's session ID")),
    responses(
        (status = 200, description = "Caller and their sessions", body = SelfDescription),
        (status = 401, description = "Unknown session")
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SelfDescription>, GatewayError> {
    Ok(Json(state.auth.describe_self(&query.session_id).await?))
}

// -- Development-only routes --------------------------------------------------

/// `GET /auth/users`
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    Ok(Json(state.metadata.list_users().await?).into_response())
}

/// `GET /auth/sessions`
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Response, GatewayError> {
    Ok(Json(state.metadata.list_sessions().await?).into_response())
}

/// `POST /auth/reset?table=users|sessions|objects`
pub async fn reset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResetQuery>,
) -> Result<Response, GatewayError> {
    let table = Table::parse(&query.table)
        .ok_or_else(|| GatewayError::Validation(format!("unknown table: {}", query.table)))?;
    state.metadata.reset(table).await?;
    tracing::warn!(table = table.as_str(), "metadata table reset");
    Ok((StatusCode::OK, "database reset").into_response())
}
