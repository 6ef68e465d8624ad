//! Postgres-backed identity store and session repository.
//!
//! `PgIdentityStore` implements the identity store behind claims
//! synchronization. Its `synchronize_user` override runs all of a sign-in's
//! writes inside one transaction, so a reader never observes a user whose
//! profile and role assignments come from different sign-ins.

use amber_turnstile_core::{RoleId, UserId};
use amber_turnstile_identity::{
    IdentityStore, LocalRole, LocalUser, RoleName, RoleSet, Session, SessionId, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    subject: String,
    email: Option<String>,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, roles: RoleSet) -> Result<LocalUser, StoreError> {
        let id = UserId::from_str(&self.id).map_err(|e| StoreError::Unavailable {
            details: format!("invalid user id '{}': {e}", self.id),
        })?;
        Ok(LocalUser::with_all_fields(
            id,
            self.subject,
            self.email,
            self.display_name,
            roles,
            self.created_at,
            self.updated_at,
        ))
    }
}

/// Row type for role queries.
#[derive(FromRow)]
struct RoleRow {
    id: String,
    name: String,
}

impl RoleRow {
    fn into_role(self) -> Result<LocalRole, StoreError> {
        let id = RoleId::from_str(&self.id).map_err(|e| StoreError::Unavailable {
            details: format!("invalid role id '{}': {e}", self.id),
        })?;
        Ok(LocalRole::with_all_fields(id, RoleName::from(self.name)))
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    roles: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, sqlx::Error> {
        let roles: RoleSet = serde_json::from_value(self.roles).unwrap_or_default();
        let user_id = UserId::from_str(&self.user_id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid user id '{}': {e}", self.user_id),
            )))
        })?;

        Ok(Session::with_all_fields(
            SessionId::new(self.id),
            user_id,
            roles,
            self.created_at,
            self.expires_at,
            self.access_token,
            self.refresh_token,
        ))
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable {
        details: err.to_string(),
    }
}

/// Identity store backed by Postgres.
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Creates a store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_roles(&self, user_id: UserId) -> Result<RoleSet, StoreError> {
        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(names.into_iter().map(|(name,)| RoleName::from(name)).collect())
    }
}

/// Upserts the user record, keyed by subject. The stored internal ID wins
/// on conflict.
async fn upsert_user_on(conn: &mut PgConnection, user: &LocalUser) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, subject, email, display_name, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (subject) DO UPDATE
        SET email = EXCLUDED.email,
            display_name = EXCLUDED.display_name,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(user.id().to_string())
    .bind(user.subject())
    .bind(user.email())
    .bind(user.display_name())
    .bind(user.created_at())
    .bind(user.updated_at())
    .execute(conn)
    .await?;

    Ok(())
}

/// Rewrites a user's role assignments to exactly the given set, creating
/// missing roles on the way. Roles referenced by no one are left in place.
async fn apply_roles_on(
    conn: &mut PgConnection,
    user_id: UserId,
    roles: &RoleSet,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    for name in roles.iter() {
        // Unique on lower(name): a concurrent insert with different casing
        // loses and the first spelling sticks.
        sqlx::query(
            r#"
            INSERT INTO roles (id, name)
            VALUES ($1, $2)
            ON CONFLICT ((lower(name))) DO NOTHING
            "#,
        )
        .bind(RoleId::new().to_string())
        .bind(name.as_str())
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE lower(name) = lower($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id.to_string())
        .bind(name.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<LocalUser>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, subject, email, display_name, created_at, updated_at
            FROM users
            WHERE subject = $1
            "#,
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => {
                let id = UserId::from_str(&row.id).map_err(|e| StoreError::Unavailable {
                    details: format!("invalid user id '{}': {e}", row.id),
                })?;
                let roles = self.load_roles(id).await?;
                Ok(Some(row.into_user(roles)?))
            }
            None => Ok(None),
        }
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<LocalUser>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, subject, email, display_name, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => {
                let roles = self.load_roles(user_id).await?;
                Ok(Some(row.into_user(roles)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_user(&self, user: &LocalUser) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        upsert_user_on(&mut conn, user).await.map_err(unavailable)
    }

    async fn find_or_create_role(&self, name: &RoleName) -> Result<LocalRole, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name)
            VALUES ($1, $2)
            ON CONFLICT ((lower(name))) DO NOTHING
            "#,
        )
        .bind(RoleId::new().to_string())
        .bind(name.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let row: RoleRow = sqlx::query_as(
            r#"
            SELECT id, name FROM roles WHERE lower(name) = lower($1)
            "#,
        )
        .bind(name.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        row.into_role()
    }

    async fn set_user_roles(&self, user_id: UserId, roles: &RoleSet) -> Result<(), StoreError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        if exists.is_none() {
            return Err(StoreError::UnknownUser { user_id });
        }

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        apply_roles_on(&mut tx, user_id, roles)
            .await
            .map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)
    }

    // One transaction for the whole sign-in: the user upsert, any missing
    // roles, and the authoritative role assignment land together or not
    // at all.
    async fn synchronize_user(&self, user: &LocalUser) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        upsert_user_on(&mut tx, user).await.map_err(unavailable)?;
        apply_roles_on(&mut tx, user.id(), user.roles())
            .await
            .map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)
    }
}

/// Repository for session operations.
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Creates a new session repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a session by ID.
    pub async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, roles, created_at, expires_at, access_token, refresh_token
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_session()?)),
            None => Ok(None),
        }
    }

    /// Creates a new session.
    pub async fn create(&self, session: &Session) -> Result<(), sqlx::Error> {
        let roles_json = serde_json::to_value(session.roles()).map_err(|e| {
            sqlx::Error::Encode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to serialize roles: {e}"),
            )))
        })?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, roles, created_at, expires_at, access_token, refresh_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().to_string())
        .bind(roles_json)
        .bind(session.created_at())
        .bind(session.expires_at())
        .bind(session.access_token())
        .bind(session.refresh_token())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a session by ID (logout).
    pub async fn delete(&self, id: &SessionId) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes expired sessions.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Generates a unique session ID using ULID.
pub fn generate_session_id() -> SessionId {
    SessionId::new(ulid::Ulid::new().to_string())
}
