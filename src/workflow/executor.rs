//! 运行执行器 - 流程层
//!
//! 核心职责：驱动"一个运行"的决策循环
//!
//! 每一轮：
//! 1. 确保浏览器会话存在（已存在则复用）
//! 2. 截图
//! 3. 请求一次决策
//! 4. 路由并应用决策（最多一个触达浏览器的动作）
//! 5. 写检查点
//! 6. 继续 / 挂起 / 结束
//!
//! 等待人工输入时循环直接返回，不占用任务；恢复时从截图步骤重新进入。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::control::RunControl;
use super::input_gate::HumanInputGate;
use super::retry::{RetryPolicy, RetryVerdict};
use super::routing::{route, Directive, PlannedAction};
use crate::clients::{AutomationClient, DecisionClient, DecisionRequest, PageEvidence};
use crate::error::{EngineError, EngineResult};
use crate::infrastructure::{CheckpointStore, SessionTable};
use crate::models::{ActionKind, LogLevel, NodeName, RunEvent, RunState, RunStatus};
use crate::services::NotificationSink;
use crate::utils::logging::run_label;

/// 单轮的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Suspend,
    Terminal,
}

/// 执行器依赖的协作者
#[derive(Clone)]
pub struct ExecutorDeps {
    pub automation: Arc<dyn AutomationClient>,
    pub decision: Arc<dyn DecisionClient>,
    pub store: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub sessions: Arc<SessionTable>,
    pub gate: Arc<HumanInputGate>,
}

/// 运行执行器
///
/// - 不持有任何运行状态，状态由调用方传入并返回
/// - 只依赖接口（自动化、决策、检查点、通知）
/// - 同一运行同一时刻只能有一个执行器在驱动，由引擎保证
#[derive(Clone)]
pub struct RunExecutor {
    deps: ExecutorDeps,
    retry: RetryPolicy,
    action_timeout: Duration,
}

impl RunExecutor {
    pub fn new(deps: ExecutorDeps, retry: RetryPolicy, action_timeout: Duration) -> Self {
        Self {
            deps,
            retry,
            action_timeout,
        }
    }

    pub fn deps(&self) -> &ExecutorDeps {
        &self.deps
    }

    /// 驱动运行直到结束、挂起或暂停，返回最新状态
    pub async fn drive(&self, mut state: RunState, control: &RunControl) -> EngineResult<RunState> {
        if state.status == RunStatus::Pending {
            state.transition(RunStatus::Running)?;
            self.save(&mut state).await?;
            self.publish_log(&state.run_id, LogLevel::Info, "开始运行");
        }
        info!("{} ▶️ 进入决策循环 (节点: {})", control, state.current_node.as_str());

        loop {
            // 安全点：取消优先于暂停
            if control.is_cancelled() {
                return self.finish_cancelled(state).await;
            }
            if control.take_pause() {
                state.transition(RunStatus::Paused)?;
                self.save(&mut state).await?;
                self.publish_status(&state, "运行已暂停");
                info!("{} ⏸️ 已暂停", control);
                return Ok(state);
            }

            let step = match self.iterate(&mut state).await {
                Ok(step) => step,
                Err(err) if err.is_infra() => self.recover(&mut state, control, err).await,
                Err(err) => return Err(err),
            };

            self.save(&mut state).await?;
            self.publish_status(&state, "");

            // 本轮进行中收到的取消，挂起前也要生效
            if step != Step::Terminal && control.is_cancelled() {
                return self.finish_cancelled(state).await;
            }

            match step {
                Step::Continue => continue,
                Step::Suspend => {
                    info!("{} ⏸️ 等待人工输入", control);
                    return Ok(state);
                }
                Step::Terminal => {
                    info!("{} 🏁 运行结束: {}", control, state.status);
                    return Ok(state);
                }
            }
        }
    }

    /// 一轮：会话 → 截图 → 决策 → 应用
    async fn iterate(&self, state: &mut RunState) -> EngineResult<Step> {
        let evidence = self.ensure_session_and_capture(state).await?;

        state.enter_node(NodeName::Decide);
        let request = DecisionRequest {
            screenshot: evidence.screenshot.clone(),
            remaining_fields: state.context.remaining_fields(),
            already_filled: state.context.filled_fields.iter().cloned().collect(),
            page_url: state.context.page_url.clone(),
            retry_count: state.retry_count,
            captcha_fail_count: state.context.captcha_fail_count,
            last_error: state.last_error.clone(),
            human_input: state.context.human_input.clone(),
        };
        let decision = self.deps.decision.decide(&request).await?;
        debug!(
            "[运行 {}] 决策: {} | {}",
            run_label(&state.run_id),
            decision.kind(),
            decision.reasoning
        );
        self.publish_log(
            &state.run_id,
            LogLevel::Info,
            format!("决策: {} {}", decision.kind(), decision.reasoning),
        );

        let kind = decision.kind();
        let target = decision.action.target().map(str::to_string);
        match route(&state.context, &decision, &evidence.screenshot) {
            Directive::Execute(action) => self.execute(state, action).await,
            Directive::Suspend(pending) => {
                state.record_action(ActionKind::WaitForHuman, Some(&pending.field_id), None, true, None);
                state.suspend_for_input(pending.clone())?;
                self.deps.gate.open(&state.run_id, pending.clone());
                self.deps
                    .sink
                    .publish(&state.run_id, RunEvent::InputRequested(pending));
                Ok(Step::Suspend)
            }
            Directive::Finish { message } => {
                state.record_action(ActionKind::Success, None, None, true, None);
                state.finish(RunStatus::Succeeded, message.clone())?;
                self.close_session(&state.run_id).await;
                self.deps.sink.publish(
                    &state.run_id,
                    RunEvent::Result {
                        success: true,
                        message,
                    },
                );
                Ok(Step::Terminal)
            }
            Directive::Fail { message } => {
                state.record_action(ActionKind::Error, None, None, false, Some(message.clone()));
                self.fail(state, message).await?;
                Ok(Step::Terminal)
            }
            Directive::RetrySignal { reason } => {
                state.record_action(kind, target.as_deref(), None, false, Some(reason.clone()));
                match self.retry.verdict(state.retry_count, state.max_retries) {
                    RetryVerdict::GiveUp => {
                        self.fail(state, format!("重试次数已用完: {}", reason)).await?;
                        Ok(Step::Terminal)
                    }
                    RetryVerdict::Retry { attempt } => {
                        state.retry_count = attempt;
                        state.last_error = Some(reason.clone());
                        self.publish_log(
                            &state.run_id,
                            LogLevel::Warning,
                            format!("🔄 重试 ({}/{}): {}", attempt, state.max_retries, reason),
                        );
                        Ok(Step::Continue)
                    }
                }
            }
        }
    }

    async fn ensure_session_and_capture(&self, state: &mut RunState) -> EngineResult<PageEvidence> {
        let run_id = state.run_id.clone();
        let evidence = if self.deps.sessions.contains(&run_id) {
            state.enter_node(NodeName::Capture);
            self.deps.automation.screenshot(&run_id).await?
        } else {
            state.enter_node(NodeName::Init);
            let target_url = state.context.target_url.clone();
            let evidence = self.deps.automation.init(&run_id, &target_url).await?;
            self.deps.sessions.register(&run_id, &target_url);
            state.advance_progress(10);
            self.publish_log(&run_id, LogLevel::Info, format!("🌐 已打开 {}", target_url));
            evidence
        };

        if !evidence.url.is_empty() {
            state.context.page_url = evidence.url.clone();
        }
        self.deps.sink.publish(
            &run_id,
            RunEvent::Media {
                step: state.current_node.as_str().to_string(),
                screenshot_base64: evidence.screenshot.clone(),
            },
        );
        Ok(evidence)
    }

    /// 应用一个触达浏览器的动作（恰好调用一次 execute）
    async fn execute(&self, state: &mut RunState, action: PlannedAction) -> EngineResult<Step> {
        state.enter_node(NodeName::Execute);
        let outcome = self
            .deps
            .automation
            .execute(&state.run_id, &action.instruction, self.action_timeout)
            .await?;

        if action.captcha_refill {
            state.context.captcha_fail_count += 1;
        }
        // 人工输入只用于填入它的那一次动作
        if action.uses_human_input {
            state.context.human_input = None;
            self.publish_log(
                &state.run_id,
                LogLevel::Success,
                format!("已把人工输入填入 {}", action.target),
            );
        }
        state.record_action(
            action.kind,
            Some(&action.target),
            action.value.as_deref(),
            outcome.success,
            outcome.error.clone(),
        );

        if outcome.success {
            if let Some(field) = &action.fills {
                state.context.filled_fields.insert(field.clone());
            }
            state.advance_progress(state.fill_progress());
            state.last_error = None;
        } else {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| format!("动作执行失败: {}", action.instruction));
            warn!("[运行 {}] ⚠️ {}", run_label(&state.run_id), message);
            self.publish_log(&state.run_id, LogLevel::Warning, message.clone());
            state.last_error = Some(message);
        }

        if let Some(screenshot) = outcome.screenshot {
            self.deps.sink.publish(
                &state.run_id,
                RunEvent::Media {
                    step: format!("after-{}", action.kind),
                    screenshot_base64: screenshot,
                },
            );
        }
        Ok(Step::Continue)
    }

    /// 基础设施故障：到上限则失败，否则计数、退避后重试同一轮
    async fn recover(&self, state: &mut RunState, control: &RunControl, err: EngineError) -> Step {
        state.enter_node(NodeName::ErrorRecovery);
        let message = err.to_string();
        state.last_error = Some(message.clone());

        match self.retry.verdict(state.retry_count, state.max_retries) {
            RetryVerdict::GiveUp => {
                error!(
                    "[运行 {}] ❌ 重试 {} 次后仍失败: {}",
                    run_label(&state.run_id),
                    state.max_retries,
                    message
                );
                let summary = format!("重试 {} 次后仍失败: {}", state.max_retries, message);
                match self.fail(state, summary).await {
                    Ok(()) => Step::Terminal,
                    Err(e) => {
                        error!("[运行 {}] 无法结束运行: {}", run_label(&state.run_id), e);
                        Step::Terminal
                    }
                }
            }
            RetryVerdict::Retry { attempt } => {
                state.retry_count = attempt;
                let delay = self.retry.backoff(attempt);
                self.publish_log(
                    &state.run_id,
                    LogLevel::Warning,
                    format!(
                        "🔄 重试 ({}/{})，{}ms 后重新截图: {}",
                        attempt,
                        state.max_retries,
                        delay.as_millis(),
                        message
                    ),
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = control.cancelled() => {}
                }
                Step::Continue
            }
        }
    }

    async fn fail(&self, state: &mut RunState, message: String) -> EngineResult<()> {
        state.finish(RunStatus::Failed, message.clone())?;
        self.close_session(&state.run_id).await;
        self.deps.sink.publish(
            &state.run_id,
            RunEvent::Result {
                success: false,
                message,
            },
        );
        Ok(())
    }

    /// 取消：等待输入的运行先回到 running，再进入 cancelled
    pub async fn finish_cancelled(&self, mut state: RunState) -> EngineResult<RunState> {
        state.abandon_wait()?;
        state.finish(RunStatus::Cancelled, "运行已取消")?;
        self.deps.gate.close(&state.run_id);
        self.close_session(&state.run_id).await;
        self.save(&mut state).await?;
        self.publish_status(&state, "运行已取消");
        self.deps.sink.publish(
            &state.run_id,
            RunEvent::Result {
                success: false,
                message: "运行已取消".to_string(),
            },
        );
        info!("[运行 {}] 🛑 已取消", run_label(&state.run_id));
        Ok(state)
    }

    /// 等待人工输入超时：先回到 running，再进入 failed
    pub async fn finish_input_timeout(&self, mut state: RunState) -> EngineResult<RunState> {
        state.abandon_wait()?;
        self.fail(&mut state, "等待人工输入超时".to_string()).await?;
        self.save(&mut state).await?;
        self.publish_status(&state, "等待人工输入超时");
        Ok(state)
    }

    /// 释放会话；会话表保证每个运行最多关闭一次
    pub async fn close_session(&self, run_id: &str) {
        if self.deps.sessions.release(run_id).is_some() {
            if let Err(e) = self.deps.automation.close(run_id).await {
                warn!("[运行 {}] 关闭浏览器会话失败: {}", run_label(run_id), e);
            }
        }
    }

    /// 写检查点；存储故障按同一重试上限退避重试
    pub async fn save(&self, state: &mut RunState) -> EngineResult<()> {
        loop {
            match self.deps.store.put(state).await {
                Ok(checkpoint) => {
                    debug!("[运行 {}] 检查点 #{}", run_label(&state.run_id), checkpoint.sequence);
                    return Ok(());
                }
                Err(err) => match self.retry.verdict(state.retry_count, state.max_retries) {
                    RetryVerdict::GiveUp => return Err(err.into()),
                    RetryVerdict::Retry { attempt } => {
                        warn!("[运行 {}] 写检查点失败，准备重试: {}", run_label(&state.run_id), err);
                        state.retry_count = attempt;
                        state.last_error = Some(err.to_string());
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                },
            }
        }
    }

    pub fn publish_status(&self, state: &RunState, message: &str) {
        self.deps.sink.publish(
            &state.run_id,
            RunEvent::Status {
                status: state.status,
                node: state.current_node.as_str().to_string(),
                progress: state.progress,
                message: message.to_string(),
            },
        );
    }

    fn publish_log(&self, run_id: &str, level: LogLevel, message: impl Into<String>) {
        self.deps.sink.publish(run_id, RunEvent::log(level, message));
    }
}
