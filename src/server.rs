//! Axum router construction and the session middleware.
//!
//! Routes are grouped the way clients see them:
//! - `/auth/*`: registration, login, logout, self-description
//! - `/storage/*`: bearer-authenticated upload, download and listing
//! - `/anonymous/*`: unauthenticated upload (as `anon`) and download
//!
//! Development-only routes are mounted when `server.dev_mode` is set.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::errors::{generate_request_id, GatewayError, REQUEST_ID_HEADER};
use crate::handlers::{auth, storage};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation for the Filegate API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Filegate API",
        version = "0.1.0",
        description = "Session-authenticated file storage gateway"
    ),
    paths(
        health_check,
        auth::check_username,
        auth::register,
        auth::login,
        auth::logout,
        auth::me,
        storage::upload,
        storage::anonymous_upload,
        storage::download,
        storage::list,
    ),
    components(schemas(
        crate::errors::ErrorBody,
        crate::auth::SelfDescription,
        crate::auth::SessionView,
        auth::RegisterRequest,
        auth::LoginRequest,
        storage::UploadResponse,
        storage::ObjectView,
    )),
    modifiers(&BearerSecurity),
    tags(
        (name = "Health", description = "Liveness endpoints"),
        (name = "Auth", description = "Accounts and sessions"),
        (name = "Storage", description = "Object upload, download and listing"),
    )
)]
pub struct ApiDoc;

// -- Router -------------------------------------------------------------------

/// Build the axum [`Router`] with every route.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let dev_mode = state.config.server.dev_mode;

    let mut auth_routes = Router::new()
        .route("/username", get(auth::check_username))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let storage_routes = Router::new()
        .route("/upload", post(storage::upload))
        .route("/download", get(storage::download))
        .route("/list", get(storage::list))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let mut anonymous_routes = Router::new()
        .route("/upload", post(storage::anonymous_upload))
        .route("/download", get(storage::download));

    if dev_mode {
        auth_routes = auth_routes
            .route("/users", get(auth::list_users))
            .route("/sessions", get(auth::list_sessions))
            .route("/reset", post(auth::reset));
        anonymous_routes = anonymous_routes.route("/list", get(storage::list_all));
    }

    let mut router = Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .nest("/auth", auth_routes)
        .nest("/storage", storage_routes)
        .nest("/anonymous", anonymous_routes);

    let metrics_enabled = state.config.observability.metrics;
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        .layer(middleware::from_fn(common_headers_middleware));
    let router = if metrics_enabled {
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    };

    router
        .layer(TraceLayer::new_for_http())
        // Uploads are spooled to disk; no in-memory body cap.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless an error response already set one) and
/// `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }
    headers.insert(header::SERVER, HeaderValue::from_static("Filegate"));
    response
}

// -- Session middleware -------------------------------------------------------

/// Identity attached to requests that passed [`require_session`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub session_id: String,
    pub username: String,
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// Anything without the exact prefix, or with nothing after it, is `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

/// Reject requests without a live session; otherwise attach a [`Principal`].
async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let session_id = bearer_token(req.headers())
        .ok_or(GatewayError::Unauthorized)?
        .to_string();

    let username = match state.auth.resolve_principal(&session_id).await {
        Ok(username) => username,
        Err(GatewayError::Internal(e)) => return Err(GatewayError::Internal(e)),
        Err(_) => {
            debug!("rejected unknown session");
            return Err(GatewayError::Unauthorized);
        }
    };

    req.extensions_mut().insert(Principal {
        session_id,
        username,
    });
    Ok(next.run(req).await)
}

// -- Liveness ---------------------------------------------------------------

/// `GET /ping`
async fn ping() -> &'static str {
    "pong"
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json`
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::geo::DisabledGeolocator;
    use crate::config::Config;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::storage::memory::MemoryBlobStore;
    use axum::body::Body;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XFILEGATEBOUNDARYX";

    fn test_state(dev_mode: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.server.dev_mode = dev_mode;
        config.observability.metrics = false;
        Arc::new(AppState::new(
            config,
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Box::new(DisabledGeolocator),
        ))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_body(fields: &[(&str, &str)], file: (&str, &[u8])) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                file.0
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.1);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri).header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    /// Register and log in, returning the session ID.
    async fn login(app: &Router, email: &str, username: &str) -> String {
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/register",
                serde_json::json!({"email": email, "password": "pw", "username": username}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                serde_json::json!({"email": email, "password": "pw"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let header = resp.headers()["x-session-id"].to_str().unwrap().to_string();
        let body = String::from_utf8(body_bytes(resp).await).unwrap();
        assert_eq!(header, body);
        body
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        for bad in ["", "Bearer", "Bearer ", "bearer abc", "Basic abc", "abc"] {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(bad));
            assert_eq!(bearer_token(&headers), None, "{bad:?}");
        }

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[tokio::test]
    async fn test_ping_and_health() {
        let app = app(test_state(false));
        let resp = app.clone().oneshot(get("/ping", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(body_bytes(resp).await, b"pong");

        let resp = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let app = app(test_state(false));
        let resp = app.oneshot(get("/openapi.json", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let doc = body_json(resp).await;
        assert!(doc["paths"]["/storage/upload"].is_object());
        assert!(doc["paths"]["/auth/login"].is_object());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = app(test_state(false));
        let sid = login(&app, "a@x.io", "alice").await;

        let resp = app
            .clone()
            .oneshot(get(&format!("/auth/me?session_id={sid}"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let me = body_json(resp).await;
        assert_eq!(me["username"], "alice");
        assert_eq!(me["sessions"][0]["current"], true);
        assert_eq!(me["sessions"][0]["location"], "unknown");

        let logout = Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .header("authorization", format!("Bearer {sid}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(logout).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(get("/storage/list", Some(&sid)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_and_login_errors() {
        let app = app(test_state(false));
        login(&app, "a@x.io", "alice").await;

        let dup = json_request(
            "POST",
            "/auth/register",
            serde_json::json!({"email": "a@x.io", "password": "pw", "username": "zed"}),
        );
        assert_eq!(app.clone().oneshot(dup).await.unwrap().status(), StatusCode::CONFLICT);

        let dup_name = json_request(
            "POST",
            "/auth/register",
            serde_json::json!({"email": "b@x.io", "password": "pw", "username": "alice"}),
        );
        let resp = app.clone().oneshot(dup_name).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "ValidationError");

        let missing = json_request(
            "POST",
            "/auth/register",
            serde_json::json!({"email": "c@x.io"}),
        );
        assert_eq!(
            app.clone().oneshot(missing).await.unwrap().status(),
            StatusCode::BAD_REQUEST
        );

        let wrong = json_request(
            "POST",
            "/auth/login",
            serde_json::json!({"email": "a@x.io", "password": "nope"}),
        );
        assert_eq!(
            app.clone().oneshot(wrong).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let unknown = json_request(
            "POST",
            "/auth/login",
            serde_json::json!({"email": "z@x.io", "password": "pw"}),
        );
        assert_eq!(app.oneshot(unknown).await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_username_availability() {
        let app = app(test_state(false));
        login(&app, "a@x.io", "alice").await;

        for (name, status, text) in [
            ("anon", StatusCode::CONFLICT, "username forbidden"),
            ("alice", StatusCode::CONFLICT, "username taken"),
            ("bob", StatusCode::OK, "username available"),
        ] {
            let resp = app
                .clone()
                .oneshot(get(&format!("/auth/username?username={name}"), None))
                .await
                .unwrap();
            assert_eq!(resp.status(), status);
            assert_eq!(body_bytes(resp).await, text.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_middleware_rejects_missing_or_malformed_header() {
        let app = app(test_state(false));
        let sid = login(&app, "a@x.io", "alice").await;

        let resp = app.clone().oneshot(get("/storage/list", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "unauthorized");

        let malformed = Request::builder()
            .uri("/storage/list")
            .header("authorization", sid.clone())
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(malformed).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let short = Request::builder()
            .uri("/storage/list")
            .header("authorization", "Bear")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(short).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );

        let resp = app
            .clone()
            .oneshot(get("/storage/list", Some("not-a-session")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app.oneshot(get("/storage/list", Some(&sid))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let app = app(test_state(false));
        let sid = login(&app, "a@x.io", "alice").await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

        let body = multipart_body(&[("path", "docs/data.bin")], ("local.bin", &payload));
        let resp = app
            .clone()
            .oneshot(upload_request("/storage/upload", Some(&sid), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let uid = body_json(resp).await["uid"].as_str().unwrap().to_string();
        assert_eq!(uid.len(), 10);

        for key in [uid.clone(), "alice/docs/data.bin".to_string()] {
            let resp = app
                .clone()
                .oneshot(get(&format!("/anonymous/download?key={key}"), None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(
                resp.headers()["content-disposition"],
                "attachment; filename=\"data.bin\""
            );
            assert_eq!(body_bytes(resp).await, payload);
        }

        let resp = app
            .clone()
            .oneshot(get(&format!("/storage/download?key=alice/{uid}"), Some(&sid)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get("/storage/list", Some(&sid))).await.unwrap();
        let listing = body_json(resp).await;
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["filename"], "docs/data.bin");
        assert_eq!(listing[0]["path"], format!("alice/{uid}/docs/data.bin"));
        assert_eq!(listing[0]["protected"], false);
        assert!(listing[0].get("password").is_none());
    }

    #[tokio::test]
    async fn test_anonymous_upload_with_password() {
        let app = app(test_state(false));
        let body = multipart_body(
            &[("key", "shared01"), ("password", "s3cret")],
            ("note.txt", b"for your eyes only"),
        );
        let resp = app
            .clone()
            .oneshot(upload_request("/anonymous/upload", None, body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["uid"], "shared01");

        let resp = app
            .clone()
            .oneshot(get("/anonymous/download?key=shared01", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(get("/anonymous/download?key=anon/note.txt&password=s3cret", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"for your eyes only");

        let resp = app
            .clone()
            .oneshot(get("/anonymous/download?key=nothing-here", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(get("/anonymous/download?key=", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_duplicate_path_upload_is_bad_request() {
        let app = app(test_state(false));
        for expected in [StatusCode::OK, StatusCode::BAD_REQUEST] {
            let body = multipart_body(&[("path", "same.txt")], ("a.txt", b"x"));
            let resp = app
                .clone()
                .oneshot(upload_request("/anonymous/upload", None, body))
                .await
                .unwrap();
            assert_eq!(resp.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_upload_without_file_is_bad_request() {
        let app = app(test_state(false));
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"key\"\r\n\r\nabc\r\n--{BOUNDARY}--\r\n"
        )
        .into_bytes();
        let resp = app
            .oneshot(upload_request("/anonymous/upload", None, body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dev_routes_hidden_by_default() {
        let app = app(test_state(false));
        for uri in ["/auth/users", "/auth/sessions", "/anonymous/list"] {
            let resp = app.clone().oneshot(get(uri, None)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_dev_routes_in_dev_mode() {
        let app = app(test_state(true));
        login(&app, "a@x.io", "alice").await;

        let resp = app.clone().oneshot(get("/auth/users", None)).await.unwrap();
        let users = body_json(resp).await;
        assert_eq!(users[0]["username"], "alice");
        assert!(users[0].get("password_hash").is_none());

        let resp = app.clone().oneshot(get("/auth/sessions", None)).await.unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        let body = multipart_body(&[], ("a.txt", b"x"));
        app.clone()
            .oneshot(upload_request("/anonymous/upload", None, body))
            .await
            .unwrap();
        let resp = app.clone().oneshot(get("/anonymous/list", None)).await.unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        let reset = Request::builder()
            .method("POST")
            .uri("/auth/reset?table=sessions")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(reset).await.unwrap().status(), StatusCode::OK);
        let resp = app.clone().oneshot(get("/auth/sessions", None)).await.unwrap();
        assert!(body_json(resp).await.as_array().unwrap().is_empty());

        let bad = Request::builder()
            .method("POST")
            .uri("/auth/reset?table=everything")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(bad).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }
}
