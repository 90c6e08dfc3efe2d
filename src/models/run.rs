//! 运行（Run）状态模型
//!
//! 一次端到端的自动填表尝试。只有执行器会修改它；引擎从不删除运行记录。
//!
//! 状态机：
//!
//! ```text
//! pending → running ⇄ waiting-for-input
//!              ⇅
//!            paused
//! running → succeeded | failed | cancelled
//! pending | paused → cancelled
//! ```
//!
//! 等待输入的运行不会直接进入终态，必须先回到 running。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::ActionKind;
use super::input::{HumanInput, InputKind, PendingInput};
use super::spec::RunSpec;
use crate::error::ProtocolError;
use crate::utils::mask_value;

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingForInput,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::WaitingForInput => "waiting-for-input",
            RunStatus::Paused => "paused",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// 迁移表
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Running)
            | (Running, WaitingForInput)
            | (Running, Paused)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            (WaitingForInput, Running) => true,
            (Paused, Running) | (Paused, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 当前所处节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Init,
    EnsureSession,
    Capture,
    Decide,
    Execute,
    AwaitInput,
    ErrorRecovery,
    Finalize,
}

impl NodeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::Init => "init",
            NodeName::EnsureSession => "ensure_session",
            NodeName::Capture => "capture",
            NodeName::Decide => "decide",
            NodeName::Execute => "execute",
            NodeName::AwaitInput => "await_input",
            NodeName::ErrorRecovery => "error_recovery",
            NodeName::Finalize => "finalize",
        }
    }
}

/// 动作历史条目（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// 已脱敏的值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 运行范围的上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub target_url: String,
    /// 当前页面地址
    #[serde(default)]
    pub page_url: String,
    /// 待填写的字段数据
    #[serde(default)]
    pub field_data: BTreeMap<String, String>,
    /// 已填写字段（防止重复填写）
    #[serde(default)]
    pub filled_fields: BTreeSet<String>,
    /// 验证码自动识别失败次数
    #[serde(default)]
    pub captcha_fail_count: u32,
    /// 恢复时注入、等待下一次决策消费的人工输入（保留键）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_input: Option<HumanInput>,
    /// 已收到的人工输入（脱敏）
    #[serde(default)]
    pub received_inputs: BTreeMap<String, String>,
}

impl RunContext {
    /// 尚未填写的字段
    pub fn remaining_fields(&self) -> BTreeMap<String, String> {
        self.field_data
            .iter()
            .filter(|(key, value)| !self.filled_fields.contains(*key) && !value.is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// 运行状态（检查点的内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    #[serde(default)]
    pub name: String,
    pub status: RunStatus,
    pub current_node: NodeName,
    /// 0-100，只增不减
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(default)]
    pub action_history: Vec<ActionRecord>,
    pub context: RunContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<PendingInput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// 根据运行定义创建初始状态（pending）
    pub fn new(run_id: impl Into<String>, spec: &RunSpec, default_max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            name: spec.name.clone(),
            status: RunStatus::Pending,
            current_node: NodeName::Init,
            progress: 0,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            last_error: None,
            result_message: None,
            action_history: Vec::new(),
            context: RunContext {
                target_url: spec.target_url.clone(),
                field_data: spec.fields.clone(),
                ..Default::default()
            },
            pending_input: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 状态迁移，非法迁移返回协议错误且不修改状态
    pub fn transition(&mut self, next: RunStatus) -> Result<(), ProtocolError> {
        if !self.status.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn enter_node(&mut self, node: NodeName) {
        self.current_node = node;
        self.updated_at = Utc::now();
    }

    /// 推进进度，保证单调不减
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    /// 根据已填写字段比例估算进度，区间 [10, 90]
    pub fn fill_progress(&self) -> u8 {
        let total = self.context.field_data.len();
        if total == 0 {
            return 10;
        }
        let filled = self
            .context
            .filled_fields
            .iter()
            .filter(|key| self.context.field_data.contains_key(*key))
            .count();
        (10 + (filled * 80 / total)) as u8
    }

    /// 追加动作历史
    pub fn record_action(
        &mut self,
        kind: ActionKind,
        target: Option<&str>,
        value: Option<&str>,
        success: bool,
        error: Option<String>,
    ) {
        let masked = match (target, value) {
            (Some(key), Some(value)) => Some(mask_value(key, value)),
            _ => None,
        };
        self.action_history.push(ActionRecord {
            kind,
            target: target.map(str::to_string),
            timestamp: Utc::now(),
            success,
            value: masked,
            error,
        });
        self.updated_at = Utc::now();
    }

    /// 挂起等待人工输入
    pub fn suspend_for_input(&mut self, pending: PendingInput) -> Result<(), ProtocolError> {
        self.transition(RunStatus::WaitingForInput)?;
        self.current_node = NodeName::AwaitInput;
        self.pending_input = Some(pending);
        Ok(())
    }

    /// 接受人工输入：清除挂起请求，把值注入上下文，回到 running
    pub fn accept_input(&mut self, kind: InputKind, value: &str) -> Result<(), ProtocolError> {
        let pending = match &self.pending_input {
            Some(pending) if self.status == RunStatus::WaitingForInput => pending.clone(),
            _ => {
                return Err(ProtocolError::NotWaitingForInput {
                    run_id: self.run_id.clone(),
                    status: self.status.to_string(),
                })
            }
        };
        if pending.kind != kind {
            return Err(ProtocolError::InputKindMismatch {
                run_id: self.run_id.clone(),
                expected: pending.kind.to_string(),
                received: kind.to_string(),
            });
        }

        self.transition(RunStatus::Running)?;
        self.pending_input = None;
        self.current_node = NodeName::Capture;

        let field_id = pending.field_id;
        if kind == InputKind::FreeFormField {
            self.context
                .field_data
                .insert(field_id.clone(), value.to_string());
        }
        self.context
            .received_inputs
            .insert(field_id.clone(), mask_value(&field_id, value));
        self.context.human_input = Some(HumanInput {
            kind,
            field_id,
            value: value.to_string(),
            received_at: Utc::now(),
        });
        Ok(())
    }

    /// 从等待输入中止：先回到 running，再进入终态
    pub fn abandon_wait(&mut self) -> Result<(), ProtocolError> {
        if self.status == RunStatus::WaitingForInput {
            self.transition(RunStatus::Running)?;
            self.pending_input = None;
        }
        Ok(())
    }

    pub fn finish(&mut self, status: RunStatus, message: impl Into<String>) -> Result<(), ProtocolError> {
        self.transition(status)?;
        self.current_node = NodeName::Finalize;
        self.result_message = Some(message.into());
        if status == RunStatus::Succeeded {
            self.advance_progress(100);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> RunSpec {
        RunSpec {
            name: "demo".into(),
            target_url: "https://example.com/register".into(),
            fields: BTreeMap::from([
                ("full name".to_string(), "Asha Rao".to_string()),
                ("email".to_string(), "asha@example.com".to_string()),
            ]),
            max_retries: None,
            file_path: None,
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Cancelled] {
            for next in [
                RunStatus::Pending,
                RunStatus::Running,
                RunStatus::WaitingForInput,
                RunStatus::Paused,
                RunStatus::Succeeded,
                RunStatus::Failed,
                RunStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn waiting_cannot_jump_to_terminal() {
        assert!(!RunStatus::WaitingForInput.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::WaitingForInput.can_transition_to(RunStatus::Cancelled));
        assert!(RunStatus::WaitingForInput.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn new_run_uses_spec_retries_or_default() {
        let mut spec = sample_spec();
        let state = RunState::new("r1", &spec, 3);
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(state.max_retries, 3);

        spec.max_retries = Some(5);
        assert_eq!(RunState::new("r2", &spec, 3).max_retries, 5);
    }

    #[test]
    fn progress_never_decreases() {
        let mut state = RunState::new("r1", &sample_spec(), 3);
        state.advance_progress(50);
        state.advance_progress(20);
        assert_eq!(state.progress, 50);
        state.advance_progress(250);
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn remaining_fields_excludes_filled() {
        let mut state = RunState::new("r1", &sample_spec(), 3);
        state.context.filled_fields.insert("email".into());
        let remaining = state.context.remaining_fields();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("full name"));
        assert_eq!(state.fill_progress(), 50);
    }

    #[test]
    fn accept_input_injects_value_and_clears_pending() {
        let mut state = RunState::new("r1", &sample_spec(), 3);
        state.transition(RunStatus::Running).unwrap();
        state
            .suspend_for_input(PendingInput {
                kind: InputKind::OneTimeCode,
                field_id: "otp".into(),
                reason: "Mobile OTP".into(),
                media: None,
                requested_at: Utc::now(),
            })
            .unwrap();

        let err = state.accept_input(InputKind::ChallengeSolution, "x").unwrap_err();
        assert!(matches!(err, ProtocolError::InputKindMismatch { .. }));
        assert_eq!(state.status, RunStatus::WaitingForInput);

        state.accept_input(InputKind::OneTimeCode, "483920").unwrap();
        assert_eq!(state.status, RunStatus::Running);
        assert!(state.pending_input.is_none());
        assert_eq!(state.context.human_input.as_ref().unwrap().value, "483920");
        assert_eq!(state.context.received_inputs["otp"], "***");
    }

    #[test]
    fn accept_input_rejected_when_not_waiting() {
        let mut state = RunState::new("r1", &sample_spec(), 3);
        let before = state.clone();
        let err = state.accept_input(InputKind::OneTimeCode, "1").unwrap_err();
        assert!(matches!(err, ProtocolError::NotWaitingForInput { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn free_form_input_becomes_field_data() {
        let mut state = RunState::new("r1", &sample_spec(), 3);
        state.transition(RunStatus::Running).unwrap();
        state
            .suspend_for_input(PendingInput {
                kind: InputKind::FreeFormField,
                field_id: "father's name".into(),
                reason: "unknown field".into(),
                media: None,
                requested_at: Utc::now(),
            })
            .unwrap();
        state.accept_input(InputKind::FreeFormField, "Ravi Rao").unwrap();
        assert_eq!(state.context.field_data["father's name"], "Ravi Rao");
    }
}
