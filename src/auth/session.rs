use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

/// Create a new session for a user. Returns the session token.
pub fn create_session(
    conn: &Connection,
    user_id: &str,
    hours: u64,
) -> Result<String, rusqlite::Error> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// The user owning an unexpired session, if any.
pub fn session_user(conn: &Connection, token: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
        params![token],
        |row| row.get(0),
    )
    .optional()
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{insert_user, migrated_pool};

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn session_lifecycle() {
        let (_tmp, pool) = migrated_pool();
        insert_user(&pool, "u1", "Asha", "user");
        let conn = pool.get().unwrap();

        let token = create_session(&conn, "u1", 1).unwrap();
        assert_eq!(session_user(&conn, &token).unwrap().as_deref(), Some("u1"));

        delete_session(&conn, &token).unwrap();
        assert!(session_user(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn expired_session_is_ignored() {
        let (_tmp, pool) = migrated_pool();
        insert_user(&pool, "u1", "Asha", "user");
        let conn = pool.get().unwrap();

        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at) \
             VALUES ('s1', 'u1', 'old', datetime('now', '-1 hours'))",
            [],
        )
        .unwrap();
        assert!(session_user(&conn, "old").unwrap().is_none());
    }
}
