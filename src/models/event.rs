//! 推送给观察者的运行事件

use serde::{Deserialize, Serialize};

use super::input::PendingInput;
use super::run::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 运行事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum RunEvent {
    Log {
        level: LogLevel,
        message: String,
    },
    Status {
        status: RunStatus,
        node: String,
        progress: u8,
        message: String,
    },
    Media {
        step: String,
        screenshot_base64: String,
    },
    InputRequested(PendingInput),
    Result {
        success: bool,
        message: String,
    },
}

impl RunEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        RunEvent::Log {
            level,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Log { .. } => "log",
            RunEvent::Status { .. } => "status",
            RunEvent::Media { .. } => "media",
            RunEvent::InputRequested(_) => "input-requested",
            RunEvent::Result { .. } => "result",
        }
    }
}
