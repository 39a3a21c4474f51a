//! 会话监管：按会话持有取消令牌
//!
//! 所有会话令牌都是根令牌的子令牌，cancel_all 一次性取消；单个会话可单独取消。
//! 会话结束后由编排器 release，避免表无限增长。

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::session::SessionId;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    /// 进程级关闭时触发
    root: CancellationToken,
    sessions: RwLock<HashMap<SessionId, CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为会话创建（或取回已有的）子令牌
    pub async fn register(&self, session_id: &str) -> CancellationToken {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// 取消指定会话；会话未登记时返回 false
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.read().await.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn release(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}
