use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open the SQLite database and run migrations.
pub fn init_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::new(manager)?;
    pool.get()?.execute_batch(SCHEMA)?;
    Ok(pool)
}

pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user TEXT NOT NULL,
  text TEXT,
  image_url TEXT,
  mime TEXT,
  created_at INTEGER NOT NULL,
  CHECK ((text IS NULL) != (image_url IS NULL))
);

CREATE INDEX IF NOT EXISTS messages_created_at ON messages(created_at);
"#;
