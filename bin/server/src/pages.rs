//! Page and API handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{OptionalAuth, RequireAdmin, middleware::NO_CHALLENGE_HEADER};

/// Landing page. Public; greets signed-in users by name.
pub async fn home(OptionalAuth(user): OptionalAuth) -> String {
    match user {
        Some(user) => {
            let name = user
                .user()
                .display_name()
                .unwrap_or_else(|| user.user().subject());
            format!("Signed in as {name}\n")
        }
        None => "Welcome. Sign in at /auth/login\n".to_string(),
    }
}

/// Admin page. Requires the configured admin role.
pub async fn admin(RequireAdmin(user): RequireAdmin) -> String {
    let roles: Vec<String> = user
        .session()
        .roles()
        .iter()
        .map(ToString::to_string)
        .collect();
    format!("Admin panel. Your roles: {}\n", roles.join(", "))
}

#[derive(Serialize)]
struct MeResponse {
    subject: String,
    email: Option<String>,
    display_name: Option<String>,
    roles: Vec<String>,
    session_expires_at: DateTime<Utc>,
}

/// Returns the signed-in user's profile as JSON.
///
/// API callers get a plain 401 when unauthenticated; the marker header
/// keeps the challenge layer from turning it into a login redirect.
pub async fn api_me(OptionalAuth(user): OptionalAuth) -> Response {
    match user {
        Some(user) => Json(MeResponse {
            subject: user.user().subject().to_string(),
            email: user.user().email().map(str::to_string),
            display_name: user.user().display_name().map(str::to_string),
            roles: user
                .session()
                .roles()
                .iter()
                .map(ToString::to_string)
                .collect(),
            session_expires_at: user.session().expires_at(),
        })
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            [(NO_CHALLENGE_HEADER, "1")],
            "Not authenticated",
        )
            .into_response(),
    }
}
