//! SQLite 任务存储（sqlx）
//!
//! 每个会话一行，snapshot 列保存完整 SessionState JSON；
//! 可选 TTL：过期快照读取时视为不存在，`purge_expired` 物理删除。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{SessionPage, StoreError, TaskStore};
use crate::session::{is_valid_session_id, SessionState};

/// 基于 SQLite 的快照存储
pub struct SqliteTaskStore {
    pool: SqlitePool,
    ttl: Option<Duration>,
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteTaskStore {
    /// 打开（或创建）数据库文件
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("create {:?}: {}", parent, e)))?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(unavailable)?;
        let store = Self { pool, ttl: None };
        store.init_tables().await?;
        Ok(store)
    }

    /// 纯内存数据库；单连接且不回收，否则每个连接各自一份库
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(unavailable)?;
        let store = Self { pool, ttl: None };
        store.init_tables().await?;
        Ok(store)
    }

    /// 设置快照保留时长（None 表示永久）
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_snapshots (
                session_id TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_snapshots_expires ON session_snapshots(expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    fn expires_at(&self) -> Option<i64> {
        self.ttl
            .map(|ttl| now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64))
    }

    /// 删除所有已过期快照，返回删除行数
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM session_snapshots WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, "Purged expired session snapshots");
        }
        Ok(purged)
    }

    fn decode(session_id: &str, raw: &str) -> Result<SessionState, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            id: session_id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn load(&self, session_id: &str) -> Result<SessionState, StoreError> {
        let row = sqlx::query(
            "SELECT snapshot FROM session_snapshots
             WHERE session_id = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(session_id)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => {
                let raw: String = row.get("snapshot");
                Self::decode(session_id, &raw)
            }
            None => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        if !is_valid_session_id(&state.session_id) {
            return Err(StoreError::InvalidKey(state.session_id.clone()));
        }
        let snapshot = serde_json::to_string(state).map_err(|e| StoreError::Corrupt {
            id: state.session_id.clone(),
            reason: e.to_string(),
        })?;
        sqlx::query(
            "INSERT INTO session_snapshots (session_id, snapshot, updated_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
        )
        .bind(&state.session_id)
        .bind(snapshot)
        .bind(state.last_updated.to_rfc3339())
        .bind(self.expires_at())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SessionPage, StoreError> {
        let page_size = page_size.max(1);
        let rows = sqlx::query(
            "SELECT session_id, snapshot FROM session_snapshots
             WHERE session_id > ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY session_id ASC
             LIMIT ?",
        )
        .bind(cursor.unwrap_or(""))
        .bind(now_millis())
        .bind((page_size + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let has_more = rows.len() > page_size;
        let mut sessions = Vec::with_capacity(page_size);
        let mut last_id = None;
        for row in rows.into_iter().take(page_size) {
            let id: String = row.get("session_id");
            let raw: String = row.get("snapshot");
            match Self::decode(&id, &raw) {
                Ok(state) => sessions.push(state.summary()),
                Err(e) => tracing::warn!(session_id = %id, "skipping snapshot: {}", e),
            }
            last_id = Some(id);
        }

        Ok(SessionPage {
            sessions,
            next_cursor: if has_more { last_id } else { None },
        })
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM session_snapshots WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
