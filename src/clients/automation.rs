//! 浏览器自动化接口
//!
//! 每个运行独占一个浏览器会话，以运行标识寻址。
//! `Err` 只表示基础设施故障（服务不可达、超时）；动作本身没做成用 `ExecuteOutcome::success == false` 表示。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AutomationError;

/// 页面证据：截图 + 当前地址
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEvidence {
    /// PNG 截图，base64
    pub screenshot: String,
    pub url: String,
}

/// 一次动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub success: bool,
    /// 动作后的截图（驱动能提供时）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteOutcome {
    pub fn succeeded(screenshot: Option<String>) -> Self {
        Self {
            success: true,
            screenshot,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            screenshot: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// 为运行打开会话并导航到目标地址
    async fn init(&self, run_id: &str, url: &str) -> Result<PageEvidence, AutomationError>;

    /// 截取当前页面
    async fn screenshot(&self, run_id: &str) -> Result<PageEvidence, AutomationError>;

    /// 执行一条自然语言指令
    async fn execute(
        &self,
        run_id: &str,
        instruction: &str,
        timeout: Duration,
    ) -> Result<ExecuteOutcome, AutomationError>;

    /// 关闭会话
    async fn close(&self, run_id: &str) -> Result<(), AutomationError>;
}
