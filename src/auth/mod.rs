//! Session-based authentication.
//!
//! [`AuthService`] registers users, verifies credentials, issues and
//! revokes sessions, and resolves a session ID to the owning username.
//! It holds explicit handles to the metadata store and the geolocator;
//! nothing here is process-global.

pub mod geo;
pub mod password;
pub mod session_id;

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SessionIdSource;
use crate::errors::GatewayError;
use crate::metadata::store::{
    now_rfc3339, MetadataStore, SessionRecord, StoreError, UserRecord,
};
use crate::metrics;
use geo::Geolocator;

/// Usernames refused by the availability check.
///
/// Registration does not consult this list.
pub const RESERVED_USERNAMES: [&str; 3] = ["anon", "admin", "root"];

/// Result of a username availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameStatus {
    Available,
    Taken,
    Forbidden,
}

/// Client details captured at login.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// `User-Agent` header, or empty.
    pub agent: String,
    /// Peer address, if known.
    pub ip: Option<IpAddr>,
}

/// One session as shown to its owner.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SessionView {
    pub location: String,
    pub agent: String,
    pub last_seen: String,
    pub created_at: String,
    /// Whether this is the session making the request.
    pub current: bool,
}

/// Response body of `GET /auth/me`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SelfDescription {
    pub email: String,
    pub username: String,
    pub sessions: Vec<SessionView>,
}

pub struct AuthService {
    store: Arc<dyn MetadataStore>,
    geo: Box<dyn Geolocator>,
    session_ids: SessionIdSource,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        geo: Box<dyn Geolocator>,
        session_ids: SessionIdSource,
    ) -> Self {
        Self {
            store,
            geo,
            session_ids,
        }
    }

    /// Check whether `username` may be claimed.  No side effects.
    pub async fn check_username(&self, username: &str) -> Result<UsernameStatus, GatewayError> {
        if RESERVED_USERNAMES.contains(&username) {
            return Ok(UsernameStatus::Forbidden);
        }
        if self.store.get_user_by_username(username).await?.is_some() {
            return Ok(UsernameStatus::Taken);
        }
        Ok(UsernameStatus::Available)
    }

    /// Create a user account.
    ///
    /// Existence is checked by email only; a duplicate username surfaces
    /// as the store's uniqueness conflict.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<(), GatewayError> {
        if email.is_empty() || password.is_empty() || username.is_empty() {
            return Err(GatewayError::Validation(
                "email, password and username are required".to_string(),
            ));
        }
        info!(email = %email, "registration attempt");

        if self.store.get_user_by_email(email).await?.is_some() {
            return Err(GatewayError::AlreadyExists(format!(
                "user already exists: {email}"
            )));
        }

        let password_hash = password::hash_password(password.to_string()).await?;
        self.store
            .create_user(UserRecord {
                email: email.to_string(),
                password_hash,
                username: username.to_string(),
                created_at: now_rfc3339(),
            })
            .await
            .map_err(|e| match e {
                // A concurrent registration won the race for this email.
                StoreError::Conflict(detail) if detail.contains("users.email") => {
                    GatewayError::AlreadyExists(format!("user already exists: {email}"))
                }
                other => other.into(),
            })?;

        info!(email = %email, username = %username, "user created");
        Ok(())
    }

    /// Verify credentials and issue a new session, returning its ID.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<String, GatewayError> {
        info!(email = %email, "login attempt");

        let user = match self.store.get_user_by_email(email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                metrics::record_login("not_found");
                return Err(GatewayError::NotFound("user not found".to_string()));
            }
            Err(e) => {
                metrics::record_login("error");
                return Err(e.into());
            }
        };

        match password::verify_password(password.to_string(), user.password_hash.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(email = %email, "login failed: invalid credentials");
                metrics::record_login("invalid");
                return Err(GatewayError::InvalidCredentials);
            }
            Err(e) => {
                metrics::record_login("error");
                return Err(e.into());
            }
        }

        let location = self.geo.locate(client.ip).await;
        let now = now_rfc3339();
        let id = session_id::new_session_id(self.session_ids);
        self.store
            .create_session(SessionRecord {
                id: id.clone(),
                email: user.email,
                location,
                agent: client.agent,
                created_at: now.clone(),
                last_seen: now,
            })
            .await
            .inspect_err(|_| metrics::record_login("error"))?;

        metrics::record_login("ok");
        info!(email = %email, "login succeeded");
        Ok(id)
    }

    /// Revoke a session.  Revoking an unknown session succeeds.
    pub async fn logout(&self, session_id: &str) -> Result<(), GatewayError> {
        if session_id.is_empty() {
            return Err(GatewayError::Unauthorized);
        }
        self.store.delete_session(session_id).await?;
        Ok(())
    }

    /// Map a session ID to its owner's username.
    ///
    /// Two point lookups: session by ID, then user by email.
    pub async fn resolve_principal(&self, session_id: &str) -> Result<String, GatewayError> {
        Ok(self.resolve_user(session_id).await?.username)
    }

    /// Describe the caller and every session they own.
    pub async fn describe_self(&self, session_id: &str) -> Result<SelfDescription, GatewayError> {
        let user = self.resolve_user(session_id).await?;
        let sessions = self
            .store
            .list_sessions_for(&user.email)
            .await?
            .into_iter()
            .map(|s| SessionView {
                current: s.id == session_id,
                location: s.location,
                agent: s.agent,
                last_seen: s.last_seen,
                created_at: s.created_at,
            })
            .collect();

        Ok(SelfDescription {
            email: user.email,
            username: user.username,
            sessions,
        })
    }

    async fn resolve_user(&self, session_id: &str) -> Result<UserRecord, GatewayError> {
        if session_id.is_empty() {
            return Err(GatewayError::Unauthorized);
        }
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(GatewayError::Unauthorized)?;
        self.store
            .get_user_by_email(&session.email)
            .await?
            .ok_or(GatewayError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use geo::{LocateFuture, DisabledGeolocator};

    struct FixedGeolocator(&'static str);

    impl Geolocator for FixedGeolocator {
        fn locate(&self, _ip: Option<IpAddr>) -> LocateFuture<'_> {
            let location = self.0.to_string();
            Box::pin(async move { location })
        }
    }

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(MemoryMetadataStore::new()),
            Box::new(DisabledGeolocator),
            SessionIdSource::Random,
        )
    }

    fn client() -> ClientInfo {
        ClientInfo {
            agent: "curl/8.0".to_string(),
            ip: None,
        }
    }

    #[tokio::test]
    async fn test_register_once_per_email() {
        let auth = service();
        auth.register("a@x.io", "pw", "alice").await.unwrap();
        let err = auth.register("a@x.io", "pw2", "other").await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
    }

    async fn assert_one_registration_wins(auth: &AuthService) {
        let (a, b) = tokio::join!(
            auth.register("a@x.io", "pw", "alice"),
            auth.register("a@x.io", "pw", "alice2"),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(GatewayError::AlreadyExists(_)))));
    }

    #[tokio::test]
    async fn test_concurrent_same_email_is_already_exists() {
        assert_one_registration_wins(&service()).await;
    }

    #[tokio::test]
    async fn test_concurrent_same_email_is_already_exists_sqlite() {
        let store = crate::metadata::sqlite::SqliteMetadataStore::new(":memory:").unwrap();
        let auth = AuthService::new(
            Arc::new(store),
            Box::new(DisabledGeolocator),
            SessionIdSource::Random,
        );
        assert_one_registration_wins(&auth).await;
    }

    #[tokio::test]
    async fn test_register_requires_all_fields() {
        let auth = service();
        for (e, p, u) in [("", "pw", "u"), ("a@x.io", "", "u"), ("a@x.io", "pw", "")] {
            assert!(matches!(
                auth.register(e, p, u).await,
                Err(GatewayError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_is_store_conflict() {
        let auth = service();
        auth.register("a@x.io", "pw", "alice").await.unwrap();
        let err = auth.register("b@x.io", "pw", "alice").await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reserved_names_only_checked_for_availability() {
        let auth = service();
        assert_eq!(auth.check_username("admin").await.unwrap(), UsernameStatus::Forbidden);
        assert_eq!(auth.check_username("bob").await.unwrap(), UsernameStatus::Available);

        // Registration is not guarded by the reserved list.
        auth.register("root@x.io", "pw", "root").await.unwrap();
        auth.register("b@x.io", "pw", "bob").await.unwrap();
        assert_eq!(auth.check_username("bob").await.unwrap(), UsernameStatus::Taken);
        assert_eq!(auth.check_username("root").await.unwrap(), UsernameStatus::Forbidden);
    }

    #[tokio::test]
    async fn test_login_resolve_logout_cycle() {
        let auth = service();
        auth.register("a@x.io", "pw", "alice").await.unwrap();

        let sid = auth.login("a@x.io", "pw", client()).await.unwrap();
        assert_eq!(auth.resolve_principal(&sid).await.unwrap(), "alice");

        auth.logout(&sid).await.unwrap();
        assert!(matches!(
            auth.resolve_principal(&sid).await,
            Err(GatewayError::Unauthorized)
        ));
        // Idempotent.
        auth.logout(&sid).await.unwrap();
        assert!(matches!(auth.logout("").await, Err(GatewayError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_login_failures_issue_no_session() {
        let store = Arc::new(MemoryMetadataStore::new());
        let auth = AuthService::new(
            store.clone(),
            Box::new(DisabledGeolocator),
            SessionIdSource::Random,
        );
        auth.register("a@x.io", "pw", "alice").await.unwrap();

        assert!(matches!(
            auth.login("a@x.io", "wrong", client()).await,
            Err(GatewayError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody@x.io", "pw", client()).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_describe_self_marks_current_session() {
        let auth = AuthService::new(
            Arc::new(MemoryMetadataStore::new()),
            Box::new(FixedGeolocator("Oslo, Oslo, NO")),
            SessionIdSource::Random,
        );
        auth.register("a@x.io", "pw", "alice").await.unwrap();
        let first = auth.login("a@x.io", "pw", client()).await.unwrap();
        let second = auth.login("a@x.io", "pw", client()).await.unwrap();
        assert_ne!(first, second);

        let me = auth.describe_self(&second).await.unwrap();
        assert_eq!(me.email, "a@x.io");
        assert_eq!(me.username, "alice");
        assert_eq!(me.sessions.len(), 2);
        assert_eq!(me.sessions.iter().filter(|s| s.current).count(), 1);
        assert!(me.sessions[1].current);
        assert_eq!(me.sessions[0].location, "Oslo, Oslo, NO");
        assert_eq!(me.sessions[0].agent, "curl/8.0");

        assert!(matches!(
            auth.describe_self("bogus").await,
            Err(GatewayError::Unauthorized)
        ));
    }
}
