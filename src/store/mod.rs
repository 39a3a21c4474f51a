//! 任务存储抽象层
//!
//! 统一的会话快照接口（load / save / list_sessions / delete），支持文件、SQLite、内存三种实现。
//! save 为整快照替换；同一会话同一时刻只有一个写者（推理循环），不同会话之间互不加锁。

pub mod file;
pub mod memory;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreSection};
use crate::session::{SessionId, SessionState, SessionSummary};

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteTaskStore;

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt snapshot for {id}: {reason}")]
    Corrupt { id: SessionId, reason: String },

    #[error("invalid session id: {0}")]
    InvalidKey(String),
}

/// 一页会话摘要；next_cursor 为 None 表示已到末尾
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub next_cursor: Option<String>,
}

/// 会话快照存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 读取完整快照
    async fn load(&self, session_id: &str) -> Result<SessionState, StoreError>;

    /// 整体替换写入；对同一会话的并发 save 以最后写入为准
    async fn save(&self, state: &SessionState) -> Result<(), StoreError>;

    /// 按 session_id 升序分页；cursor 为上一页最后一个 session_id（不含）
    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SessionPage, StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// 后端名称（日志用）
    fn backend_name(&self) -> &'static str;
}

/// 对已按 session_id 升序排列的摘要做 keyset 分页
pub(crate) fn paginate(
    mut sorted: Vec<SessionSummary>,
    cursor: Option<&str>,
    page_size: usize,
) -> SessionPage {
    let page_size = page_size.max(1);
    if let Some(c) = cursor {
        sorted.retain(|s| s.session_id.as_str() > c);
    }
    let has_more = sorted.len() > page_size;
    sorted.truncate(page_size);
    let next_cursor = if has_more {
        sorted.last().map(|s| s.session_id.clone())
    } else {
        None
    };
    SessionPage {
        sessions: sorted,
        next_cursor,
    }
}

/// 按配置创建任务存储
///
/// sqlite 后端打开失败时回退到文件后端；未启用 async-sqlite feature 时同样回退
pub async fn create_task_store(cfg: &StoreSection) -> Arc<dyn TaskStore> {
    match cfg.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory task store");
            return Arc::new(MemoryTaskStore::new());
        }
        StoreBackend::Sqlite => {
            #[cfg(feature = "async-sqlite")]
            match SqliteTaskStore::open(&cfg.db_path).await {
                Ok(store) => {
                    tracing::info!("Using sqlite task store: {:?}", cfg.db_path);
                    return Arc::new(store.with_ttl(cfg.ttl()));
                }
                Err(e) => {
                    tracing::warn!("Failed to open sqlite store, falling back to files: {}", e);
                }
            }

            #[cfg(not(feature = "async-sqlite"))]
            tracing::warn!("Sqlite store requested but async-sqlite feature not enabled, using files");
        }
        StoreBackend::File => {}
    }

    tracing::info!("Using file task store: {:?}", cfg.dir);
    Arc::new(FileTaskStore::new(&cfg.dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summaries(ids: &[&str]) -> Vec<SessionSummary> {
        ids.iter().map(|id| SessionState::new(*id, "g").summary()).collect()
    }

    #[test]
    fn test_paginate_walks_all_pages() {
        let all = summaries(&["a", "b", "c", "d", "e"]);
        let p1 = paginate(all.clone(), None, 2);
        assert_eq!(p1.sessions.len(), 2);
        assert_eq!(p1.next_cursor.as_deref(), Some("b"));
        let p2 = paginate(all.clone(), p1.next_cursor.as_deref(), 2);
        assert_eq!(p2.next_cursor.as_deref(), Some("d"));
        let p3 = paginate(all, p2.next_cursor.as_deref(), 2);
        assert_eq!(p3.sessions.len(), 1);
        assert_eq!(p3.sessions[0].session_id, "e");
        assert!(p3.next_cursor.is_none());
    }

    #[test]
    fn test_paginate_exact_fit_has_no_cursor() {
        let p = paginate(summaries(&["a", "b"]), None, 2);
        assert!(p.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_factory_memory_backend() {
        let cfg = StoreSection {
            backend: StoreBackend::Memory,
            ..StoreSection::default()
        };
        let store = create_task_store(&cfg).await;
        assert_eq!(store.backend_name(), "memory");
    }
}
