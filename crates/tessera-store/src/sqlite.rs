use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::KvError;
use crate::kv::{KvStore, wrong_type};

/// SQLite-backed [`KvStore`]. Survives restarts, so queued items and run
/// state outlive the process that wrote them.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
  pool: SqlitePool,
}

impl SqliteKvStore {
  /// Create a store over an existing pool. Call [`migrate`](Self::migrate)
  /// before first use.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database file at `path` and migrate it.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
    let options = SqliteConnectOptions::new()
      .filename(path.as_ref())
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .connect_with(options)
      .await
      .map_err(unavailable)?;

    let store = Self::new(pool);
    store.migrate().await?;
    debug!(path = %path.as_ref().display(), "kv_store_opened");
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), KvError> {
    sqlx::migrate!("./migrations")
      .run(&self.pool)
      .await
      .map_err(|e| KvError::unavailable(e.to_string()))
  }
}

fn unavailable(e: sqlx::Error) -> KvError {
  KvError::unavailable(e.to_string())
}

async fn kind_of(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, KvError> {
  sqlx::query_scalar("SELECT kind FROM kv_entries WHERE key = ?")
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unavailable)
}

/// Fails unless `key` is absent or already holds `kind`; absent keys are
/// claimed for `kind`.
async fn claim(conn: &mut SqliteConnection, key: &str, kind: &'static str) -> Result<(), KvError> {
  match kind_of(&mut *conn, key).await?.as_deref() {
    None => {
      sqlx::query("INSERT INTO kv_entries (key, kind) VALUES (?, ?)")
        .bind(key)
        .bind(kind)
        .execute(&mut *conn)
        .await
        .map_err(unavailable)?;
      Ok(())
    }
    Some(existing) if existing == kind => Ok(()),
    Some(_) => Err(wrong_type(key, kind)),
  }
}

/// `Ok(false)` when the key is absent, `Ok(true)` when it holds `kind`.
async fn holds(conn: &mut SqliteConnection, key: &str, kind: &'static str) -> Result<bool, KvError> {
  match kind_of(conn, key).await?.as_deref() {
    None => Ok(false),
    Some(existing) if existing == kind => Ok(true),
    Some(_) => Err(wrong_type(key, kind)),
  }
}

async fn delete_key(conn: &mut SqliteConnection, key: &str) -> Result<(), KvError> {
  for sql in [
    "DELETE FROM kv_entries WHERE key = ?",
    "DELETE FROM kv_hash_fields WHERE key = ?",
    "DELETE FROM kv_list_items WHERE key = ?",
  ] {
    sqlx::query(sql)
      .bind(key)
      .execute(&mut *conn)
      .await
      .map_err(unavailable)?;
  }
  Ok(())
}

#[async_trait]
impl KvStore for SqliteKvStore {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
    let row: Option<(String, Option<String>)> =
      sqlx::query_as("SELECT kind, value FROM kv_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

    match row {
      None => Ok(None),
      Some((kind, value)) if kind == "string" => Ok(value),
      Some(_) => Err(wrong_type(key, "string")),
    }
  }

  async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    delete_key(&mut tx, key).await?;
    sqlx::query("INSERT INTO kv_entries (key, kind, value) VALUES (?, 'string', ?)")
      .bind(key)
      .bind(value)
      .execute(&mut *tx)
      .await
      .map_err(unavailable)?;
    tx.commit().await.map_err(unavailable)
  }

  async fn delete(&self, key: &str) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    delete_key(&mut tx, key).await?;
    tx.commit().await.map_err(unavailable)
  }

  async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    claim(&mut tx, key, "hash").await?;
    sqlx::query(
      r#"
      INSERT INTO kv_hash_fields (key, field, value) VALUES (?, ?, ?)
      ON CONFLICT (key, field) DO UPDATE SET value = excluded.value
      "#,
    )
    .bind(key)
    .bind(field)
    .bind(value)
    .execute(&mut *tx)
    .await
    .map_err(unavailable)?;
    tx.commit().await.map_err(unavailable)
  }

  async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
    let mut conn = self.pool.acquire().await.map_err(unavailable)?;
    if !holds(&mut conn, key, "hash").await? {
      return Ok(None);
    }
    sqlx::query_scalar("SELECT value FROM kv_hash_fields WHERE key = ? AND field = ?")
      .bind(key)
      .bind(field)
      .fetch_optional(&mut *conn)
      .await
      .map_err(unavailable)
  }

  async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
    let mut conn = self.pool.acquire().await.map_err(unavailable)?;
    if !holds(&mut conn, key, "hash").await? {
      return Ok(HashMap::new());
    }
    let rows: Vec<(String, String)> =
      sqlx::query_as("SELECT field, value FROM kv_hash_fields WHERE key = ?")
        .bind(key)
        .fetch_all(&mut *conn)
        .await
        .map_err(unavailable)?;
    Ok(rows.into_iter().collect())
  }

  async fn list_push(&self, key: &str, value: String) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    claim(&mut tx, key, "list").await?;
    sqlx::query("INSERT INTO kv_list_items (key, value) VALUES (?, ?)")
      .bind(key)
      .bind(value)
      .execute(&mut *tx)
      .await
      .map_err(unavailable)?;
    tx.commit().await.map_err(unavailable)
  }

  async fn list_pop(&self, key: &str) -> Result<Option<String>, KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    if !holds(&mut tx, key, "list").await? {
      return Ok(None);
    }

    let head: Option<(i64, String)> =
      sqlx::query_as("SELECT id, value FROM kv_list_items WHERE key = ? ORDER BY id LIMIT 1")
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable)?;
    let Some((id, value)) = head else {
      return Ok(None);
    };

    sqlx::query("DELETE FROM kv_list_items WHERE id = ?")
      .bind(id)
      .execute(&mut *tx)
      .await
      .map_err(unavailable)?;

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list_items WHERE key = ?")
      .bind(key)
      .fetch_one(&mut *tx)
      .await
      .map_err(unavailable)?;
    if remaining == 0 {
      delete_key(&mut tx, key).await?;
    }

    tx.commit().await.map_err(unavailable)?;
    Ok(Some(value))
  }

  async fn list_len(&self, key: &str) -> Result<usize, KvError> {
    let mut conn = self.pool.acquire().await.map_err(unavailable)?;
    if !holds(&mut conn, key, "list").await? {
      return Ok(0);
    }
    let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list_items WHERE key = ?")
      .bind(key)
      .fetch_one(&mut *conn)
      .await
      .map_err(unavailable)?;
    Ok(len as usize)
  }

  async fn list_range(&self, key: &str, start: usize) -> Result<Vec<String>, KvError> {
    let mut conn = self.pool.acquire().await.map_err(unavailable)?;
    if !holds(&mut conn, key, "list").await? {
      return Ok(Vec::new());
    }
    sqlx::query_scalar("SELECT value FROM kv_list_items WHERE key = ? ORDER BY id LIMIT -1 OFFSET ?")
      .bind(key)
      .bind(start as i64)
      .fetch_all(&mut *conn)
      .await
      .map_err(unavailable)
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
    sqlx::query_scalar(
      "SELECT key FROM kv_entries WHERE substr(key, 1, length(?)) = ? ORDER BY key",
    )
    .bind(prefix)
    .bind(prefix)
    .fetch_all(&self.pool)
    .await
    .map_err(unavailable)
  }

  async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
    let mut tx = self.pool.begin().await.map_err(unavailable)?;
    let row: Option<(String, Option<String>)> =
      sqlx::query_as("SELECT kind, value FROM kv_entries WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable)?;

    let current = match row {
      None => 0,
      Some((kind, Some(value))) if kind == "string" => value
        .parse::<i64>()
        .map_err(|_| wrong_type(key, "integer"))?,
      Some(_) => return Err(wrong_type(key, "integer")),
    };

    let next = current + delta;
    sqlx::query(
      r#"
      INSERT INTO kv_entries (key, kind, value) VALUES (?, 'string', ?)
      ON CONFLICT (key) DO UPDATE SET value = excluded.value
      "#,
    )
    .bind(key)
    .bind(next.to_string())
    .execute(&mut *tx)
    .await
    .map_err(unavailable)?;
    tx.commit().await.map_err(unavailable)?;
    Ok(next)
  }
}
