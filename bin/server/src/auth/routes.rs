//! Authentication routes for login, the provider callback, and logout.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use amber_turnstile_identity::{EstablishError, FlowError, SessionId, SignInFlow, SyncError};
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::{
    AppState,
    middleware::NO_CHALLENGE_HEADER,
    oidc::{AuthState, OidcError},
    store::{SessionRepository, generate_session_id},
};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// Auth state cookie name (for CSRF protection during the OIDC flow).
const AUTH_STATE_COOKIE: &str = "auth_state";

/// Query parameters for the OIDC callback.
///
/// On failure the provider sends `error`/`error_description` instead of a
/// code.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (auth_url, auth_state) = state.oidc_client.authorization_url();

    // Store the auth state in a secure cookie for validation on callback
    let auth_state_json = match serde_json::to_string(&AuthStateData {
        csrf_token: auth_state.csrf_token,
        pkce_verifier: auth_state.pkce_verifier,
        nonce: auth_state.nonce,
    }) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize auth state");
            return AuthError::Internal.into_response();
        }
    };

    let cookie = Cookie::build((AUTH_STATE_COOKIE, auth_state_json))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(10));

    (jar.add(cookie), Redirect::to(&auth_url)).into_response()
}

/// Handles the OIDC callback after the user authenticates with the
/// identity provider.
///
/// The session cookie is issued strictly after claims synchronization
/// succeeds; any failure before that point leaves the caller without a
/// session, and validation failures carry their reason in the response
/// body instead of being swallowed.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    // One flow tracks the whole attempt; the establisher continues it after
    // validation.
    let mut flow = SignInFlow::new();
    flow.challenge(false)?;

    // Provider-reported failure (user cancelled, consent denied, ...)
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        let reason = format!("{error}: {description}");
        flow.validation_failed(&reason)?;
        return Err(AuthError::ProviderError(reason));
    }

    let code = query.code.ok_or(AuthError::MissingCode)?;
    let csrf_state = query.state.ok_or(AuthError::MissingAuthState)?;

    // Retrieve and validate auth state from cookie
    let auth_state_cookie = jar
        .get(AUTH_STATE_COOKIE)
        .ok_or(AuthError::MissingAuthState)?;

    let auth_state_data: AuthStateData =
        serde_json::from_str(auth_state_cookie.value()).map_err(|_| AuthError::InvalidAuthState)?;

    // Validate CSRF token
    if csrf_state != auth_state_data.csrf_token {
        return Err(AuthError::CsrfMismatch);
    }

    let auth_state = AuthState {
        csrf_token: auth_state_data.csrf_token,
        pkce_verifier: auth_state_data.pkce_verifier,
        nonce: auth_state_data.nonce,
    };

    // Exchange the authorization code for tokens and validate the ID token
    let token_result = match state.oidc_client.exchange_code(&code, &auth_state).await {
        Ok(result) => result,
        Err(err @ OidcError::TokenValidation(_)) => {
            let reason = err.to_string();
            flow.validation_failed(&reason)?;
            return Err(AuthError::TokenValidation(reason));
        }
        Err(err) => return Err(AuthError::TokenExchange(err.to_string())),
    };
    flow.external_validated()?;

    // Sync the local store with the validated claims, then issue a session
    let session_id: SessionId = generate_session_id();
    let session = state
        .establisher
        .establish(
            &mut flow,
            session_id.clone(),
            &token_result.identity,
            Some(token_result.access_token),
            token_result.refresh_token,
        )
        .await?;

    let session_repo = SessionRepository::new(state.db_pool.clone());
    session_repo
        .create(&session)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?;

    // Set session cookie
    let session_cookie = Cookie::build((SESSION_COOKIE, session_id.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(state.session_config.duration_minutes));

    // Remove auth state cookie
    let remove_auth_state = Cookie::build((AUTH_STATE_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    let jar = jar.add(session_cookie).add(remove_auth_state);

    Ok((jar, Redirect::to("/")))
}

/// Logs out the user by deleting their session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    // Get session ID from cookie
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        let session_id = SessionId::new(session_cookie.value().to_string());

        // Delete session from database
        let session_repo = SessionRepository::new(state.db_pool.clone());
        if let Err(err) = session_repo.delete(&session_id).await {
            tracing::warn!(error = %err, "failed to delete session on logout");
        }
    }

    // Remove session cookie
    let remove_session = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove_session), Redirect::to("/"))
}

/// Serializable auth state for cookie storage.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct AuthStateData {
    csrf_token: String,
    pkce_verifier: String,
    nonce: String,
}

/// Authentication errors surfaced by the sign-in routes.
#[derive(Debug)]
pub enum AuthError {
    MissingCode,
    MissingAuthState,
    InvalidAuthState,
    CsrfMismatch,
    ProviderError(String),
    TokenValidation(String),
    TokenExchange(String),
    MissingSubjectClaim,
    StoreUnavailable,
    Database(String),
    Internal,
}

impl From<FlowError> for AuthError {
    fn from(err: FlowError) -> Self {
        tracing::error!(error = %err, "sign-in flow driven out of order");
        Self::Internal
    }
}

impl From<EstablishError> for AuthError {
    fn from(err: EstablishError) -> Self {
        match err {
            EstablishError::Sync(SyncError::MissingSubjectClaim) => Self::MissingSubjectClaim,
            EstablishError::Sync(SyncError::StoreUnavailable { details }) => {
                tracing::error!(details, "identity store unavailable during sign-in");
                Self::StoreUnavailable
            }
            EstablishError::Flow(err) => {
                tracing::error!(error = %err, "sign-in flow driven out of order");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingCode => (
                StatusCode::BAD_REQUEST,
                "Missing authorization code".to_string(),
            ),
            Self::MissingAuthState => (StatusCode::BAD_REQUEST, "Missing auth state".to_string()),
            Self::InvalidAuthState => (StatusCode::BAD_REQUEST, "Invalid auth state".to_string()),
            Self::CsrfMismatch => (StatusCode::BAD_REQUEST, "CSRF token mismatch".to_string()),
            Self::ProviderError(reason) => (
                StatusCode::UNAUTHORIZED,
                format!("Sign-in failed at the identity provider: {reason}"),
            ),
            Self::TokenValidation(reason) => {
                (StatusCode::UNAUTHORIZED, format!("Sign-in failed: {reason}"))
            }
            Self::TokenExchange(msg) => {
                tracing::error!("token exchange failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Authentication failed".to_string(),
                )
            }
            Self::MissingSubjectClaim => (
                StatusCode::UNAUTHORIZED,
                "Sign-in failed: the identity provider sent no subject claim".to_string(),
            ),
            Self::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Sign-in temporarily unavailable, please retry".to_string(),
            ),
            Self::Database(msg) => {
                tracing::error!("database error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let mut response = (status, message).into_response();
        if response.status() == StatusCode::UNAUTHORIZED {
            // These 401s carry the failure reason for the caller; mark them
            // so the challenge layer does not rewrite them into a redirect
            // back to /auth/login.
            response
                .headers_mut()
                .insert(NO_CHALLENGE_HEADER, HeaderValue::from_static("1"));
        }
        response
    }
}
