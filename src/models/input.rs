//! 人工输入相关类型

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 人工输入类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    /// 一次性验证码
    #[serde(alias = "otp")]
    OneTimeCode,
    /// 人机验证（图片验证码等）的答案
    #[serde(alias = "captcha")]
    ChallengeSolution,
    /// 无法从已知数据推断的自由字段
    #[serde(alias = "custom")]
    FreeFormField,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::OneTimeCode => "one-time-code",
            InputKind::ChallengeSolution => "challenge-solution",
            InputKind::FreeFormField => "free-form-field",
        }
    }

    /// 未指明字段时使用的默认字段标识
    pub fn default_field_id(&self) -> &'static str {
        match self {
            InputKind::OneTimeCode => "otp",
            InputKind::ChallengeSolution => "captcha",
            InputKind::FreeFormField => "custom",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "one-time-code" | "otp" => Ok(InputKind::OneTimeCode),
            "challenge-solution" | "captcha" | "challenge" => Ok(InputKind::ChallengeSolution),
            "free-form-field" | "custom" | "field" => Ok(InputKind::FreeFormField),
            other => Err(format!("未知的输入类型: {}", other)),
        }
    }
}

/// 挂起中的人工输入请求
///
/// 仅在状态为等待输入时存在，匹配的提交被接受后立即清除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    pub kind: InputKind,
    /// 字段或验证码的标识
    pub field_id: String,
    /// 需要人工介入的原因
    pub reason: String,
    /// 附带的媒体（人机验证截图，base64）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// 已注入上下文、等待下一次决策消费的人工输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInput {
    pub kind: InputKind,
    pub field_id: String,
    pub value: String,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_and_aliases() {
        assert_eq!("one-time-code".parse::<InputKind>(), Ok(InputKind::OneTimeCode));
        assert_eq!("OTP".parse::<InputKind>(), Ok(InputKind::OneTimeCode));
        assert_eq!("challenge_solution".parse::<InputKind>(), Ok(InputKind::ChallengeSolution));
        assert_eq!("custom".parse::<InputKind>(), Ok(InputKind::FreeFormField));
        assert!("sms".parse::<InputKind>().is_err());
    }

    #[test]
    fn deserializes_llm_aliases() {
        let kind: InputKind = serde_json::from_str("\"captcha\"").unwrap();
        assert_eq!(kind, InputKind::ChallengeSolution);
        assert_eq!(serde_json::to_string(&InputKind::OneTimeCode).unwrap(), "\"one-time-code\"");
    }
}
