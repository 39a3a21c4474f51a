//! 进程内任务存储（测试与一次性运行）

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{paginate, SessionPage, StoreError, TaskStore};
use crate::session::SessionState;

/// 以 BTreeMap 保存快照副本，天然按 session_id 排序
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    sessions: RwLock<BTreeMap<String, SessionState>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load(&self, session_id: &str) -> Result<SessionState, StoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SessionPage, StoreError> {
        let all = self
            .sessions
            .read()
            .await
            .values()
            .map(SessionState::summary)
            .collect();
        Ok(paginate(all, cursor, page_size))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
