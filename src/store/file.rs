//! 本地文件任务存储
//!
//! 每个会话一个 `{session_id}.json`，内容为完整 SessionState（自描述）。
//! 写入先落到同目录临时文件再 rename，读者只会看到旧快照或新快照，不会看到半截文件。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use super::{paginate, SessionPage, StoreError, TaskStore};
use crate::session::{is_valid_session_id, SessionState};

const SNAPSHOT_EXT: &str = "json";
const READ_CONCURRENCY: usize = 8;

/// 单机 / 离线场景的文件存储
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_session_id(session_id) {
            return Err(StoreError::InvalidKey(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{session_id}.{SNAPSHOT_EXT}")))
    }

    async fn read_snapshot(&self, session_id: &str) -> Result<SessionState, StoreError> {
        let path = self.snapshot_path(session_id)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()))
            }
            Err(e) => return Err(StoreError::Unavailable(format!("read {:?}: {}", path, e))),
        };
        serde_json::from_str(&data).map_err(|e| StoreError::Corrupt {
            id: session_id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load(&self, session_id: &str) -> Result<SessionState, StoreError> {
        self.read_snapshot(session_id).await
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let path = self.snapshot_path(&state.session_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("create {:?}: {}", self.dir, e)))?;
        let data = serde_json::to_string_pretty(state).map_err(|e| StoreError::Corrupt {
            id: state.session_id.clone(),
            reason: e.to_string(),
        })?;
        // 临时文件名带随机后缀，同一会话的并发写者互不覆盖临时文件
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            state.session_id,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Unavailable(format!("write {:?}: {}", tmp, e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Unavailable(format!("rename {:?}: {}", path, e)));
        }
        Ok(())
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SessionPage, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SessionPage::default()),
            Err(e) => return Err(StoreError::Unavailable(format!("list {:?}: {}", self.dir, e))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_session_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();

        // 只读取游标之后 page_size + 1 个快照，避免全量反序列化；并发读、按序消费
        let page_size = page_size.max(1);
        let mut summaries = Vec::with_capacity(page_size + 1);
        let mut reads = stream::iter(
            ids.into_iter()
                .filter(|id| cursor.map_or(true, |c| id.as_str() > c)),
        )
        .map(|id| async move { self.read_snapshot(&id).await })
        .buffered(READ_CONCURRENCY);

        while let Some(read) = reads.next().await {
            match read {
                Ok(state) => summaries.push(state.summary()),
                // list 与 delete 竞争时文件可能已不存在
                Err(StoreError::NotFound(_)) => {}
                Err(StoreError::Corrupt { id, reason }) => {
                    tracing::warn!(session_id = %id, "skipping corrupt snapshot: {}", reason);
                }
                Err(e) => return Err(e),
            }
            if summaries.len() > page_size {
                break;
            }
        }
        Ok(paginate(summaries, None, page_size))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.snapshot_path(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(session_id.to_string()))
            }
            Err(e) => Err(StoreError::Unavailable(format!("delete {:?}: {}", path, e))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::new(dir.path());
        let state = SessionState::new("../escape", "g");
        assert!(matches!(
            store.save(&state).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.load("a/b").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::new(dir.path());
        store.save(&SessionState::new("s1", "g")).await.unwrap();
        store.save(&SessionState::new("s1", "g2")).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
        assert_eq!(store.load("s1").await.unwrap().goal, "g2");
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let store = FileTaskStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(StoreError::Corrupt { .. })
        ));
        let page = store.list_sessions(None, 10).await.unwrap();
        assert!(page.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::new(dir.path().join("nope"));
        let page = store.list_sessions(None, 5).await.unwrap();
        assert!(page.sessions.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
