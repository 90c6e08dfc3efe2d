//! 错误类型
//!
//! 按来源分层：自动化驱动、决策服务、检查点存储、协议（调用方误用）、配置。
//! `EngineError::is_infra()` 决定一次失败是否走退避重试路径。

use thiserror::Error;

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 浏览器自动化错误
    #[error("自动化错误: {0}")]
    Automation(#[from] AutomationError),
    /// 决策服务错误
    #[error("决策服务错误: {0}")]
    Decision(#[from] DecisionError),
    /// 检查点存储错误
    #[error("检查点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 协议错误（拒绝的操作，不修改任何运行状态）
    #[error("操作被拒绝: {0}")]
    Protocol(#[from] ProtocolError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// 是否为基础设施故障（无法访问自动化/决策/检查点服务）
    pub fn is_infra(&self) -> bool {
        match self {
            EngineError::Automation(_) | EngineError::Decision(_) | EngineError::Checkpoint(_) => {
                true
            }
            EngineError::Protocol(_) | EngineError::Config(_) => false,
        }
    }
}

/// 浏览器自动化错误
#[derive(Debug, Error)]
pub enum AutomationError {
    /// 无法连接自动化服务
    #[error("无法访问自动化服务 ({endpoint}): {message}")]
    Unreachable { endpoint: String, message: String },
    /// 调用超时
    #[error("自动化调用超时 ({operation}, {timeout_secs}秒)")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },
    /// 驱动返回错误
    #[error("驱动返回错误: {0}")]
    Driver(String),
    /// 该运行没有浏览器会话
    #[error("运行 {0} 没有浏览器会话")]
    NoSession(String),
}

impl AutomationError {
    pub fn unreachable(endpoint: impl Into<String>, source: impl std::fmt::Display) -> Self {
        AutomationError::Unreachable {
            endpoint: endpoint.into(),
            message: source.to_string(),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for AutomationError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AutomationError::Driver(err.to_string())
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::Driver(format!("脚本返回值无法解析: {}", err))
    }
}

/// 决策服务错误
///
/// 只表示传输层失败；格式不合规的响应会被映射成 `retry` 决策，不会出现在这里。
#[derive(Debug, Error)]
pub enum DecisionError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    ApiCallFailed { model: String, message: String },
    /// 请求超时
    #[error("LLM 请求超时 (模型: {model}, {timeout_secs}秒)")]
    Timeout { model: String, timeout_secs: u64 },
    /// 请求构建失败
    #[error("构建 LLM 请求失败: {0}")]
    RequestBuild(String),
}

/// 检查点存储错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 序列化失败
    #[error("序列化失败: {0}")]
    Serialization(String),
    /// 存储读写失败
    #[error("存储失败: {0}")]
    Storage(String),
    /// 检查点损坏
    #[error("检查点损坏 ({run_id}): {message}")]
    Corrupted { run_id: String, message: String },
    /// 非法的运行标识
    #[error("非法的运行标识: {0}")]
    InvalidRunId(String),
}

/// 协议错误：调用方的请求与运行当前状态不符
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// 没有保存的状态
    #[error("运行 {0} 没有保存的状态")]
    NoSavedState(String),
    /// 运行当前不在等待输入
    #[error("运行 {run_id} 当前不在等待输入 (状态: {status})")]
    NotWaitingForInput { run_id: String, status: String },
    /// 输入类型不匹配
    #[error("运行 {run_id} 等待的是 {expected} 输入，收到的是 {received}")]
    InputKindMismatch {
        run_id: String,
        expected: String,
        received: String,
    },
    /// 该运行已有活动的执行循环
    #[error("运行 {0} 已有活动的执行循环")]
    RunBusy(String),
    /// 运行已结束
    #[error("运行 {run_id} 已结束 (状态: {status})")]
    AlreadyFinished { run_id: String, status: String },
    /// 运行未在执行
    #[error("运行 {0} 当前没有活动的执行循环")]
    NotRunning(String),
    /// 运行未暂停
    #[error("运行 {run_id} 未处于暂停状态 (状态: {status})")]
    NotPaused { run_id: String, status: String },
    /// 非法状态迁移
    #[error("非法状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 运行定义文件读取失败
    #[error("读取运行定义失败 ({path}): {message}")]
    SpecReadFailed { path: String, message: String },
    /// 运行定义解析失败
    #[error("解析运行定义失败 ({path}): {message}")]
    SpecParseFailed { path: String, message: String },
    /// 运行定义无效
    #[error("运行定义无效: {0}")]
    InvalidSpec(String),
    /// 浏览器启动或连接失败
    #[error("浏览器初始化失败: {0}")]
    Browser(String),
}

/// 引擎结果类型
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_not_infra() {
        let err = EngineError::from(ProtocolError::NoSavedState("r1".into()));
        assert!(!err.is_infra());
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn transport_errors_are_infra() {
        let err = EngineError::from(AutomationError::unreachable("http://x", "connection refused"));
        assert!(err.is_infra());
        assert!(err.to_string().contains("connection refused"));

        let err = EngineError::from(DecisionError::Timeout {
            model: "m".into(),
            timeout_secs: 60,
        });
        assert!(err.is_infra());
    }

    #[test]
    fn script_value_errors_become_driver_errors() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = AutomationError::from(parse_err);
        assert!(matches!(err, AutomationError::Driver(ref m) if m.contains("脚本返回值无法解析")));
        assert!(EngineError::from(err).is_infra());
    }
}
