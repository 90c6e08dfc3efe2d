//! 检查点：某一时刻运行状态的完整快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::RunState;

/// 不可变快照，按运行标识存储；新快照整体替换旧快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 每个运行内单调递增
    pub sequence: u64,
    pub saved_at: DateTime<Utc>,
    pub state: RunState,
}

impl Checkpoint {
    pub fn new(sequence: u64, state: RunState) -> Self {
        Self {
            sequence,
            saved_at: Utc::now(),
            state,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }
}
