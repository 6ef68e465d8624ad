//! Authentication middleware and extractors for Axum.
//!
//! Unauthenticated page requests are sent to `/auth/login`, which redirects
//! to the identity provider. Responses that already carry a deliberate 401
//! (API endpoints) are marked with [`NO_CHALLENGE_HEADER`] so the challenge
//! layer leaves them alone instead of redirecting into a loop.

use axum::{
    extract::{FromRef, FromRequestParts, Request},
    http::{HeaderName, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use amber_turnstile_identity::{
    ChallengeDecision, IdentityStore, LocalUser, RoleName, Session, SessionId, challenge_decision,
};
use std::sync::Arc;

use super::{AppState, routes::SESSION_COOKIE, store::SessionRepository};

/// Response header marking a 401 as deliberate, suppressing the login
/// redirect.
pub const NO_CHALLENGE_HEADER: HeaderName = HeaderName::from_static("x-no-challenge");

/// A signed-in user, resolved from the session cookie.
///
/// Authorization runs against the roles captured in the session at sign-in
/// time; the identity provider is not consulted.
pub struct CurrentUser {
    session: Session,
    user: LocalUser,
}

impl CurrentUser {
    /// Returns the session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the local user record.
    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    /// Returns true if the session carries the given role.
    pub fn has_role(&self, role: &RoleName) -> bool {
        self.session.has_role(role)
    }
}

/// Extractor for requiring an authenticated user.
///
/// Rejects with a plain 401; the challenge layer turns that into a login
/// redirect for page requests.
pub struct RequireAuth(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection::InternalError)?;

        // Get session ID from cookie
        let session_cookie = jar
            .get(SESSION_COOKIE)
            .ok_or(AuthRejection::NotAuthenticated)?;

        let session_id = SessionId::new(session_cookie.value().to_string());

        // Look up session in database
        let session_repo = SessionRepository::new(app_state.db_pool.clone());
        let session = session_repo
            .find_by_id(&session_id)
            .await
            .map_err(|_| AuthRejection::InternalError)?
            .ok_or(AuthRejection::NotAuthenticated)?;

        // Check if session is expired
        if session.is_expired() {
            // Delete the expired session
            if let Err(err) = session_repo.delete(&session_id).await {
                tracing::warn!(error = %err, "failed to delete expired session");
            }
            return Err(AuthRejection::SessionExpired);
        }

        // Load the local user the session references
        let user = app_state
            .establisher
            .synchronizer()
            .store()
            .find_user_by_id(session.user_id())
            .await
            .map_err(|_| AuthRejection::InternalError)?
            .ok_or(AuthRejection::NotAuthenticated)?;

        Ok(RequireAuth(CurrentUser { session, user }))
    }
}

/// Extractor for optionally getting the authenticated user.
///
/// Returns None if the user is not authenticated.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequireAuth::from_request_parts(parts, state).await {
            Ok(RequireAuth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

/// Extractor for requiring a user with the configured admin role.
pub struct RequireAdmin(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;

        let admin_role = RoleName::from(app_state.oidc_client.config().admin_role());
        if !user.has_role(&admin_role) {
            return Err(AuthRejection::AdminRequired);
        }

        Ok(RequireAdmin(user))
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    NotAuthenticated,
    SessionExpired,
    AdminRequired,
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotAuthenticated | Self::SessionExpired => {
                StatusCode::UNAUTHORIZED.into_response()
            }
            Self::AdminRequired => (StatusCode::FORBIDDEN, "Admin access required").into_response(),
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

/// Response layer that challenges unauthenticated requests.
///
/// A 401 without the suppression marker becomes a redirect into the login
/// flow. A 401 carrying the marker was produced deliberately and passes
/// through unchanged (minus the internal marker header).
pub async fn challenge_layer(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    apply_challenge(response)
}

fn apply_challenge(mut response: Response) -> Response {
    if response.status() != StatusCode::UNAUTHORIZED {
        return response;
    }

    let suppressed = response.headers().contains_key(&NO_CHALLENGE_HEADER);
    match challenge_decision(suppressed) {
        ChallengeDecision::RedirectToProvider => Redirect::to("/auth/login").into_response(),
        ChallengeDecision::Suppressed => {
            response.headers_mut().remove(&NO_CHALLENGE_HEADER);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unauthorized(marked: bool) -> Response {
        let mut response = StatusCode::UNAUTHORIZED.into_response();
        if marked {
            response
                .headers_mut()
                .insert(NO_CHALLENGE_HEADER, "1".parse().unwrap());
        }
        response
    }

    #[test]
    fn unmarked_unauthorized_is_redirected_to_login() {
        let response = apply_challenge(unauthorized(false));

        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/auth/login"
        );
    }

    #[tokio::test]
    async fn sign_in_failure_response_keeps_its_status_and_reason() {
        use super::super::routes::AuthError;

        let failure = AuthError::TokenValidation("signature mismatch".to_string()).into_response();
        let response = apply_challenge(failure);

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = String::from_utf8(bytes.to_vec()).expect("utf8 body");
        assert!(body.contains("signature mismatch"));
    }

    #[test]
    fn marked_unauthorized_passes_through() {
        let response = apply_challenge(unauthorized(true));

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // The internal marker never reaches the client
        assert!(!response.headers().contains_key(&NO_CHALLENGE_HEADER));
    }

    #[test]
    fn other_statuses_are_untouched() {
        let ok = StatusCode::OK.into_response();
        let response = apply_challenge(ok);
        assert_eq!(response.status(), StatusCode::OK);

        let forbidden = StatusCode::FORBIDDEN.into_response();
        let response = apply_challenge(forbidden);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
