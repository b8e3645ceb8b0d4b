pub mod models;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    ("002_issues", include_str!("../../migrations/002_issues.sql")),
];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per connection, so every pooled connection gets them
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Fixtures shared by the unit tests of the store-backed modules.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn migrated_pool() -> (tempfile::TempDir, DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("test.db")).unwrap();
        run_migrations(&pool).unwrap();
        (tmp, pool)
    }

    pub fn insert_user(pool: &DbPool, id: &str, name: &str, role: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash) VALUES (?1, ?2, 'x')",
            params![id, format!("{}@civicpulse.test", id)],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO profiles (user_id, full_name, role) VALUES (?1, ?2, ?3)",
            params![id, name, role],
        )
        .unwrap();
    }

    pub fn insert_issue(pool: &DbPool, id: &str, user_id: &str, status: &str, created_at: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO issues (id, user_id, title, description, category, status, \
                                 latitude, longitude, address, created_at) \
             VALUES (?1, ?2, ?3, 'Pothole near the bus stop', 'road_damage', ?4, \
                     12.97, 77.59, 'MG Road, Bengaluru', ?5)",
            params![id, user_id, format!("Issue {}", id), status, created_at],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn migrations_run_successfully() {
        let (_tmp, pool) = migrated_pool();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["users", "profiles", "sessions", "issues", "upvotes", "comments"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let (_tmp, pool) = migrated_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_enforced_on_every_connection() {
        let (_tmp, pool) = migrated_pool();

        // Hold one connection so the next checkout is a different one
        let _held = pool.get().unwrap();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO comments (id, user_id, issue_id, content, created_at) \
             VALUES ('c1', 'nobody', 'nothing', 'hello', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn issue_checks_reject_unknown_status() {
        let (_tmp, pool) = migrated_pool();
        insert_user(&pool, "u1", "Asha", "user");
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO issues (id, user_id, title, description, category, status, \
                                 latitude, longitude, created_at) \
             VALUES ('i1', 'u1', 't', 'd', 'noise', 'closed', 0, 0, '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
