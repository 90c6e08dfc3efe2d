//! 决策服务接口

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::DecisionError;
use crate::models::{ActionDecision, HumanInput};

/// 一次决策所需的全部上下文
#[derive(Debug, Clone, Default)]
pub struct DecisionRequest {
    /// 当前页面截图，base64
    pub screenshot: String,
    /// 尚未填写的字段
    pub remaining_fields: BTreeMap<String, String>,
    /// 已填写的字段名
    pub already_filled: Vec<String>,
    pub page_url: String,
    pub retry_count: u32,
    pub captcha_fail_count: u32,
    /// 上一次动作的失败原因
    pub last_error: Option<String>,
    /// 刚收到的人工输入
    pub human_input: Option<HumanInput>,
}

#[async_trait]
pub trait DecisionClient: Send + Sync {
    /// 根据截图和上下文给出下一步动作
    ///
    /// 只有传输层失败（超时、服务不可达）才返回 `Err`；
    /// 无法解析的响应必须映射成 `retry` 决策。
    async fn decide(&self, request: &DecisionRequest) -> Result<ActionDecision, DecisionError>;
}
