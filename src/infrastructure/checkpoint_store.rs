//! 检查点存储
//!
//! 运行标识 → 最新检查点。写入新检查点整体替换旧的，读取方不会看到半写状态。
//! 所有实现都必须能被多个运行并发访问。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::CheckpointError;
use crate::models::{Checkpoint, RunState};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 写入运行的最新状态，返回生成的检查点
    async fn put(&self, state: &RunState) -> Result<Checkpoint, CheckpointError>;

    /// 读取运行的当前检查点
    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// 列出所有有检查点的运行
    async fn list_run_ids(&self) -> Result<Vec<String>, CheckpointError>;
}

/// 内存实现（测试、单进程使用）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, state: &RunState) -> Result<Checkpoint, CheckpointError> {
        let mut data = self.data.write().await;
        let sequence = data
            .get(&state.run_id)
            .map(|previous| previous.sequence + 1)
            .unwrap_or(1);
        let checkpoint = Checkpoint::new(sequence, state.clone());
        data.insert(state.run_id.clone(), checkpoint.clone());
        Ok(checkpoint)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.data.read().await.get(run_id).cloned())
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.data.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// 文件实现：每个运行一个 JSON 文件，先写临时文件再原子重命名
pub struct FileCheckpointStore {
    dir: PathBuf,
    sequences: DashMap<String, u64>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(Self {
            dir,
            sequences: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.dir.join(format!("{}{}", run_id, CHECKPOINT_SUFFIX)))
    }

    async fn next_sequence(&self, run_id: &str) -> Result<u64, CheckpointError> {
        if let Some(current) = self.sequences.get(run_id) {
            return Ok(*current + 1);
        }
        // 进程重启后从磁盘恢复序号
        let previous = self.get(run_id).await?.map(|c| c.sequence).unwrap_or(0);
        Ok(previous + 1)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, state: &RunState) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(&state.run_id)?;
        let sequence = self.next_sequence(&state.run_id).await?;
        let checkpoint = Checkpoint::new(sequence, state.clone());

        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        self.sequences.insert(state.run_id.clone(), sequence);
        Ok(checkpoint)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(run_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::Storage(e.to_string())),
        };

        let checkpoint = serde_json::from_slice::<Checkpoint>(&bytes).map_err(|e| {
            CheckpointError::Corrupted {
                run_id: run_id.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Some(checkpoint))
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(CHECKPOINT_SUFFIX) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunSpec, RunStatus};

    fn sample_state(run_id: &str) -> RunState {
        let spec = RunSpec::new("https://example.org/register").with_field("name", "Asha");
        RunState::new(run_id, &spec, 3)
    }

    #[tokio::test]
    async fn memory_store_supersedes_previous_checkpoint() {
        let store = MemoryCheckpointStore::new();
        let mut state = sample_state("run-1");

        let first = store.put(&state).await.unwrap();
        state.transition(RunStatus::Running).unwrap();
        let second = store.put(&state).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let current = store.get("run-1").await.unwrap().unwrap();
        assert_eq!(current.state.status, RunStatus::Running);
        assert!(store.get("run-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = sample_state("run-1");
        {
            let store = FileCheckpointStore::new(dir.path()).unwrap();
            store.put(&state).await.unwrap();
            state.transition(RunStatus::Running).unwrap();
            store.put(&state).await.unwrap();
        }

        // 模拟进程重启
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let loaded = store.get("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.sequence, 2);
        assert_eq!(loaded.state.status, RunStatus::Running);

        let next = store.put(&state).await.unwrap();
        assert_eq!(next.sequence, 3);
        assert_eq!(store.list_run_ids().await.unwrap(), vec!["run-1".to_string()]);
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let err = store.get("../escape").await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidRunId(_)));
    }

    #[tokio::test]
    async fn file_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.checkpoint.json"), b"{not json").unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupted { .. }));
    }
}
