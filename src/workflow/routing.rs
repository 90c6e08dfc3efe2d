//! 决策路由
//!
//! 把一次决策翻译成执行器要做的事。纯函数，不调用任何外部服务。

use chrono::Utc;

use crate::models::{
    ActionDecision, ActionKind, DecisionAction, HumanInput, InputKind, PendingInput, RunContext,
};
use crate::services::prompts::{
    build_button_instruction, build_fill_instruction, build_toggle_instruction,
    CAPTCHA_ESCALATION_THRESHOLD,
};

/// 一个会触达浏览器的动作
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub kind: ActionKind,
    pub target: String,
    pub instruction: String,
    /// 填写的值（写入历史前会脱敏）
    pub value: Option<String>,
    /// 成功后加入已填写集合的字段
    pub fills: Option<String>,
    /// 重新填写验证码，计入验证码失败次数
    pub captcha_refill: bool,
    /// 本次动作使用了人工输入的原值
    pub uses_human_input: bool,
}

/// 路由结果
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Execute(PlannedAction),
    Suspend(PendingInput),
    Finish { message: String },
    Fail { message: String },
    RetrySignal { reason: String },
}

pub fn is_captcha_field(field: &str) -> bool {
    field.to_lowercase().contains("captcha")
}

/// 人工输入是否应该填到这个字段，只看字段名
fn matches_human_input(input: &HumanInput, field: &str) -> bool {
    let field_lower = field.to_lowercase();
    let target_lower = input.field_id.to_lowercase();
    if field_lower == target_lower {
        return true;
    }
    // 自由字段只认精确字段名
    match input.kind {
        InputKind::OneTimeCode => {
            field_lower.contains(&target_lower) || field_lower.contains("otp") || field_lower.contains("code")
        }
        InputKind::ChallengeSolution => field_lower.contains(&target_lower) || is_captcha_field(field),
        InputKind::FreeFormField => false,
    }
}

fn instruction_or(decision: &ActionDecision, fallback: impl FnOnce() -> String) -> String {
    if decision.instruction.trim().is_empty() {
        fallback()
    } else {
        decision.instruction.clone()
    }
}

/// 路由一次决策
///
/// `screenshot` 是本轮截图，人机验证转人工时作为附带媒体。
pub fn route(context: &RunContext, decision: &ActionDecision, screenshot: &str) -> Directive {
    match &decision.action {
        DecisionAction::Success { message } => Directive::Finish {
            message: message.clone().unwrap_or_else(|| "表单提交成功".to_string()),
        },
        DecisionAction::Error { message } => Directive::Fail {
            message: message.clone(),
        },
        DecisionAction::Retry { reason } => Directive::RetrySignal {
            reason: reason.clone(),
        },
        DecisionAction::WaitForHuman {
            kind,
            reason,
            field_id,
        } => Directive::Suspend(PendingInput {
            kind: *kind,
            field_id: field_id
                .clone()
                .unwrap_or_else(|| kind.default_field_id().to_string()),
            reason: reason.clone(),
            media: (*kind == InputKind::ChallengeSolution).then(|| screenshot.to_string()),
            requested_at: Utc::now(),
        }),
        DecisionAction::ClickToggle { label } => Directive::Execute(PlannedAction {
            kind: ActionKind::ClickToggle,
            target: label.clone(),
            instruction: instruction_or(decision, || build_toggle_instruction(label)),
            value: None,
            fills: None,
            captcha_refill: false,
            uses_human_input: false,
        }),
        DecisionAction::ClickButton { label } => Directive::Execute(PlannedAction {
            kind: ActionKind::ClickButton,
            target: label.clone(),
            instruction: instruction_or(decision, || build_button_instruction(label)),
            value: None,
            fills: None,
            captcha_refill: false,
            uses_human_input: false,
        }),
        DecisionAction::FillField { field, value } => route_fill(context, decision, field, value, screenshot),
    }
}

fn route_fill(
    context: &RunContext,
    decision: &ActionDecision,
    field: &str,
    value: &str,
    screenshot: &str,
) -> Directive {
    // 刚收到的人工输入：原值直接进指令，不经过模型转述
    if let Some(input) = &context.human_input {
        if matches_human_input(input, field) {
            return Directive::Execute(PlannedAction {
                kind: ActionKind::FillField,
                target: field.to_string(),
                instruction: build_fill_instruction(field, &input.value),
                value: Some(input.value.clone()),
                fills: Some(field.to_string()),
                captcha_refill: false,
                uses_human_input: true,
            });
        }
    }

    let mut captcha_refill = false;
    if context.filled_fields.contains(field) {
        if !is_captcha_field(field) {
            return Directive::RetrySignal {
                reason: format!("字段 {} 已填写，不再重复填写", field),
            };
        }
        if context.captcha_fail_count >= CAPTCHA_ESCALATION_THRESHOLD {
            return Directive::Suspend(PendingInput {
                kind: InputKind::ChallengeSolution,
                field_id: field.to_string(),
                reason: format!(
                    "验证码自动识别已失败 {} 次，需要人工识别",
                    context.captcha_fail_count
                ),
                media: Some(screenshot.to_string()),
                requested_at: Utc::now(),
            });
        }
        captcha_refill = true;
    }

    let value = if value.is_empty() {
        context.field_data.get(field).cloned().unwrap_or_default()
    } else {
        value.to_string()
    };
    if value.is_empty() {
        return Directive::RetrySignal {
            reason: format!("字段 {} 没有可填写的值", field),
        };
    }

    let instruction = instruction_or(decision, || build_fill_instruction(field, &value));

    Directive::Execute(PlannedAction {
        kind: ActionKind::FillField,
        target: field.to_string(),
        instruction,
        value: Some(value),
        fills: Some(field.to_string()),
        captcha_refill,
        uses_human_input: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn context() -> RunContext {
        RunContext {
            target_url: "https://example.org/register".into(),
            field_data: BTreeMap::from([
                ("email".to_string(), "asha@example.com".to_string()),
                ("full name".to_string(), "Asha Rao".to_string()),
            ]),
            ..Default::default()
        }
    }

    fn fill(field: &str, value: &str) -> ActionDecision {
        ActionDecision::new(
            DecisionAction::FillField {
                field: field.into(),
                value: value.into(),
            },
            "",
        )
    }

    fn human(kind: InputKind, field_id: &str, value: &str) -> HumanInput {
        HumanInput {
            kind,
            field_id: field_id.into(),
            value: value.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn fill_builds_instruction_when_missing() {
        match route(&context(), &fill("email", "asha@example.com"), "img") {
            Directive::Execute(action) => {
                assert_eq!(action.fills.as_deref(), Some("email"));
                assert!(action.instruction.contains("asha@example.com"));
                assert!(!action.captcha_refill);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_value_falls_back_to_field_data() {
        match route(&context(), &fill("full name", ""), "img") {
            Directive::Execute(action) => assert_eq!(action.value.as_deref(), Some("Asha Rao")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            route(&context(), &fill("nickname", ""), "img"),
            Directive::RetrySignal { .. }
        ));
    }

    #[test]
    fn refilling_a_filled_field_is_a_retry_signal() {
        let mut ctx = context();
        ctx.filled_fields.insert("email".into());
        assert!(matches!(
            route(&ctx, &fill("email", "asha@example.com"), "img"),
            Directive::RetrySignal { .. }
        ));
    }

    #[test]
    fn captcha_refill_counts_then_escalates() {
        let mut ctx = context();
        ctx.filled_fields.insert("captcha".into());
        match route(&ctx, &fill("captcha", "x7Kp"), "img") {
            Directive::Execute(action) => assert!(action.captcha_refill),
            other => panic!("unexpected {:?}", other),
        }

        ctx.captcha_fail_count = CAPTCHA_ESCALATION_THRESHOLD;
        match route(&ctx, &fill("captcha", "x7Kp"), "img") {
            Directive::Suspend(pending) => {
                assert_eq!(pending.kind, InputKind::ChallengeSolution);
                assert_eq!(pending.media.as_deref(), Some("img"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn human_input_is_forwarded_literally() {
        let mut ctx = context();
        ctx.human_input = Some(human(InputKind::OneTimeCode, "otp", "483920"));
        match route(&ctx, &fill("Enter OTP", "000000"), "img") {
            Directive::Execute(action) => {
                assert!(action.uses_human_input);
                assert_eq!(action.value.as_deref(), Some("483920"));
                assert!(action.instruction.contains("'483920'"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // 与人工输入无关的字段照常填写
        match route(&ctx, &fill("email", "asha@example.com"), "img") {
            Directive::Execute(action) => assert!(!action.uses_human_input),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_fill_of_unrelated_field_keeps_human_input() {
        let mut ctx = context();
        ctx.human_input = Some(human(InputKind::OneTimeCode, "otp", "483920"));
        match route(&ctx, &fill("email", ""), "img") {
            Directive::Execute(action) => {
                assert!(!action.uses_human_input);
                assert_eq!(action.value.as_deref(), Some("asha@example.com"));
            }
            other => panic!("unexpected {:?}", other),
        }

        match route(&ctx, &fill("otp", ""), "img") {
            Directive::Execute(action) => {
                assert!(action.uses_human_input);
                assert_eq!(action.value.as_deref(), Some("483920"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn free_form_input_needs_exact_field_name() {
        let mut ctx = context();
        ctx.human_input = Some(human(InputKind::FreeFormField, "name", "Asha"));

        match route(&ctx, &fill("full name", ""), "img") {
            Directive::Execute(action) => {
                assert!(!action.uses_human_input);
                assert_eq!(action.value.as_deref(), Some("Asha Rao"));
            }
            other => panic!("unexpected {:?}", other),
        }

        match route(&ctx, &fill("Name", ""), "img") {
            Directive::Execute(action) => {
                assert!(action.uses_human_input);
                assert_eq!(action.value.as_deref(), Some("Asha"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn human_captcha_solution_bypasses_refill_counter() {
        let mut ctx = context();
        ctx.filled_fields.insert("captcha".into());
        ctx.captcha_fail_count = CAPTCHA_ESCALATION_THRESHOLD;
        ctx.human_input = Some(human(InputKind::ChallengeSolution, "captcha", "QW3rt"));
        match route(&ctx, &fill("captcha", ""), "img") {
            Directive::Execute(action) => {
                assert!(action.uses_human_input);
                assert!(!action.captcha_refill);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wait_for_challenge_carries_screenshot() {
        let decision = ActionDecision::new(
            DecisionAction::WaitForHuman {
                kind: InputKind::ChallengeSolution,
                reason: "captcha".into(),
                field_id: None,
            },
            "",
        );
        match route(&context(), &decision, "img") {
            Directive::Suspend(pending) => {
                assert_eq!(pending.field_id, "captcha");
                assert_eq!(pending.media.as_deref(), Some("img"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn terminal_decisions_map_directly() {
        let success = ActionDecision::new(DecisionAction::Success { message: None }, "");
        assert!(matches!(route(&context(), &success, ""), Directive::Finish { .. }));
        let error = ActionDecision::new(
            DecisionAction::Error {
                message: "closed".into(),
            },
            "",
        );
        assert_eq!(
            route(&context(), &error, ""),
            Directive::Fail {
                message: "closed".into()
            }
        );
    }
}
