// Identity provider - password accounts, sessions and profiles
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::auth::session;
use crate::db::models::{Profile, Role};
use crate::issues::domain::ValidationErrors;
use crate::state::DbPool;

const MIN_PASSWORD_LEN: usize = 6;

/// Errors never reveal whether an email address is registered.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired")]
    SessionExpired,

    #[error("Unable to create account with these details")]
    SignUpRejected,

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub token: String,
    pub user: Profile,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Session, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;

    /// The session behind `token`, or None when it is unknown or expired.
    async fn current(&self, token: &str) -> Result<Option<Session>, AuthError>;
}

pub struct SqliteIdentity {
    pool: DbPool,
    session_hours: u64,
    cost: u32,
}

impl SqliteIdentity {
    pub fn new(pool: DbPool, session_hours: u64) -> Self {
        Self {
            pool,
            session_hours,
            cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt work factor.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Promote or demote an account. Returns false when the user does not exist.
    pub fn set_role(&self, email: &str, role: Role) -> Result<bool, AuthError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE profiles SET role = ?1 \
             WHERE user_id = (SELECT id FROM users WHERE email = ?2)",
            params![role.as_str(), email.trim()],
        )?;
        Ok(rows > 0)
    }
}

fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>, rusqlite::Error> {
    conn.query_row(
        "SELECT u.id, u.email, p.full_name, p.role FROM users u \
         JOIN profiles p ON p.user_id = u.id WHERE u.id = ?1",
        params![user_id],
        |row| {
            let role: String = row.get(3)?;
            Ok(Profile {
                user_id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
                role: role.parse().unwrap_or_default(),
            })
        },
    )
    .optional()
}

fn validate_sign_up(email: &str, password: &str, full_name: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        errors.add("email", "Please enter a valid email address");
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }
    if full_name.trim().is_empty() {
        errors.add("full_name", "Full name is required");
    }
    errors.into_result(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl IdentityProvider for SqliteIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Session, AuthError> {
        validate_sign_up(email, password, full_name).map_err(AuthError::Validation)?;

        let hash = bcrypt::hash(password, self.cost)?;
        let user_id = uuid::Uuid::now_v7().to_string();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        match tx.execute(
            "INSERT INTO users (id, email, password_hash) VALUES (?1, ?2, ?3)",
            params![user_id, email.trim(), hash],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!("Sign-up rejected for an existing account");
                return Err(AuthError::SignUpRejected);
            }
            Err(e) => return Err(e.into()),
        }
        tx.execute(
            "INSERT INTO profiles (user_id, full_name, role) VALUES (?1, ?2, 'user')",
            params![user_id, full_name.trim()],
        )?;
        let token = session::create_session(&tx, &user_id, self.session_hours)?;
        let user = load_profile(&tx, &user_id)?.ok_or(AuthError::SignUpRejected)?;
        tx.commit()?;

        tracing::info!("New account {}", user_id);
        Ok(Session { token, user })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let conn = self.pool.get()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![email.trim()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((user_id, hash)) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials);
        }

        let user = load_profile(&conn, &user_id)?.ok_or(AuthError::InvalidCredentials)?;
        let token = session::create_session(&conn, &user_id, self.session_hours)?;
        Ok(Session { token, user })
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let conn = self.pool.get()?;
        session::delete_session(&conn, token)?;
        Ok(())
    }

    async fn current(&self, token: &str) -> Result<Option<Session>, AuthError> {
        let conn = self.pool.get()?;
        let Some(user_id) = session::session_user(&conn, token)? else {
            return Ok(None);
        };
        Ok(load_profile(&conn, &user_id)?.map(|user| Session {
            token: token.to_string(),
            user,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::migrated_pool;

    fn identity() -> (tempfile::TempDir, SqliteIdentity) {
        let (tmp, pool) = migrated_pool();
        (tmp, SqliteIdentity::new(pool, 24).with_cost(4))
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let (_tmp, id) = identity();
        let created = id
            .sign_up("asha@example.com", "secret1", "Asha")
            .await
            .unwrap();
        assert_eq!(created.user.full_name, "Asha");
        assert_eq!(created.user.role, Role::User);

        let session = id.sign_in("ASHA@example.com", "secret1").await.unwrap();
        assert_eq!(session.user.user_id, created.user.user_id);
        assert_ne!(session.token, created.token);
    }

    #[tokio::test]
    async fn sign_in_errors_are_generic() {
        let (_tmp, id) = identity();
        id.sign_up("asha@example.com", "secret1", "Asha")
            .await
            .unwrap();

        let wrong_password = id.sign_in("asha@example.com", "nope").await.unwrap_err();
        let unknown_email = id.sign_in("ravi@example.com", "secret1").await.unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected_generically() {
        let (_tmp, id) = identity();
        id.sign_up("asha@example.com", "secret1", "Asha")
            .await
            .unwrap();
        let err = id
            .sign_up("asha@example.com", "another1", "Someone")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignUpRejected));
        assert!(!err.to_string().contains("asha@example.com"));
    }

    #[tokio::test]
    async fn sign_up_validates_fields() {
        let (_tmp, id) = identity();
        let err = id.sign_up("not-an-email", "123", " ").await.unwrap_err();
        match err {
            AuthError::Validation(errors) => {
                assert!(errors.get("email").is_some());
                assert!(errors.get("password").is_some());
                assert!(errors.get("full_name").is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn current_and_sign_out() {
        let (_tmp, id) = identity();
        let session = id
            .sign_up("asha@example.com", "secret1", "Asha")
            .await
            .unwrap();

        let current = id.current(&session.token).await.unwrap().unwrap();
        assert_eq!(current.user.email, "asha@example.com");

        id.sign_out(&session.token).await.unwrap();
        assert!(id.current(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_role_promotes_to_admin() {
        let (_tmp, id) = identity();
        let session = id
            .sign_up("asha@example.com", "secret1", "Asha")
            .await
            .unwrap();

        assert!(id.set_role("asha@example.com", Role::Admin).unwrap());
        assert!(!id.set_role("ghost@example.com", Role::Admin).unwrap());

        let current = id.current(&session.token).await.unwrap().unwrap();
        assert!(current.user.is_admin());
    }
}
