//! 浏览器会话表
//!
//! 由引擎实例持有并按引用传递，记录哪些运行已经分配了浏览器会话。
//! 会话的初始化与关闭都经过这里，保证同一运行不会重复初始化、也不会重复关闭。

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// 会话信息
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub target_url: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, SessionInfo>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.sessions.contains_key(run_id)
    }

    /// 登记会话；已存在时返回 false
    pub fn register(&self, run_id: &str, target_url: &str) -> bool {
        match self.sessions.entry(run_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(SessionInfo {
                    target_url: target_url.to_string(),
                    opened_at: Utc::now(),
                });
                true
            }
        }
    }

    /// 移除会话；只有第一次调用返回会话信息
    pub fn release(&self, run_id: &str) -> Option<SessionInfo> {
        self.sessions.remove(run_id).map(|(_, info)| info)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
