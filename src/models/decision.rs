//! 动作决策
//!
//! 决策服务每轮返回的单一动作指令，只在当前步骤内存在，不会持久化。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::input::InputKind;

/// 动作类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    ClickToggle,
    FillField,
    ClickButton,
    WaitForHuman,
    Success,
    Error,
    Retry,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ClickToggle => "click-toggle",
            ActionKind::FillField => "fill-field",
            ActionKind::ClickButton => "click-button",
            ActionKind::WaitForHuman => "wait-for-human",
            ActionKind::Success => "success",
            ActionKind::Error => "error",
            ActionKind::Retry => "retry",
        }
    }

    /// 是否会影响浏览器
    pub fn touches_browser(&self) -> bool {
        matches!(
            self,
            ActionKind::ClickToggle | ActionKind::FillField | ActionKind::ClickButton
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 带参数的决策动作
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    ClickToggle { label: String },
    FillField { field: String, value: String },
    ClickButton { label: String },
    WaitForHuman {
        kind: InputKind,
        reason: String,
        field_id: Option<String>,
    },
    Success { message: Option<String> },
    Error { message: String },
    Retry { reason: String },
}

impl DecisionAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            DecisionAction::ClickToggle { .. } => ActionKind::ClickToggle,
            DecisionAction::FillField { .. } => ActionKind::FillField,
            DecisionAction::ClickButton { .. } => ActionKind::ClickButton,
            DecisionAction::WaitForHuman { .. } => ActionKind::WaitForHuman,
            DecisionAction::Success { .. } => ActionKind::Success,
            DecisionAction::Error { .. } => ActionKind::Error,
            DecisionAction::Retry { .. } => ActionKind::Retry,
        }
    }

    /// 动作目标（字段名、按钮文字等），用于动作历史
    pub fn target(&self) -> Option<&str> {
        match self {
            DecisionAction::ClickToggle { label } | DecisionAction::ClickButton { label } => {
                Some(label)
            }
            DecisionAction::FillField { field, .. } => Some(field),
            DecisionAction::WaitForHuman { kind, field_id, .. } => {
                Some(field_id.as_deref().unwrap_or(kind.default_field_id()))
            }
            DecisionAction::Success { .. }
            | DecisionAction::Error { .. }
            | DecisionAction::Retry { .. } => None,
        }
    }
}

/// 一次决策
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDecision {
    pub action: DecisionAction,
    /// 交给自动化驱动的自然语言指令
    pub instruction: String,
    /// 决策理由
    pub reasoning: String,
}

impl ActionDecision {
    pub fn new(action: DecisionAction, instruction: impl Into<String>) -> Self {
        Self {
            action,
            instruction: instruction.into(),
            reasoning: String::new(),
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            reasoning: reason.clone(),
            action: DecisionAction::Retry { reason },
            instruction: String::new(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}
