//! 集成测试用的假自动化驱动、脚本化决策和事件记录

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use form_autopilot::clients::{
    AutomationClient, DecisionClient, DecisionRequest, ExecuteOutcome, PageEvidence,
};
use form_autopilot::error::{AutomationError, CheckpointError, DecisionError};
use form_autopilot::infrastructure::{CheckpointStore, MemoryCheckpointStore, SessionTable};
use form_autopilot::models::{ActionDecision, Checkpoint, DecisionAction, InputKind, RunEvent, RunState};
use form_autopilot::services::NotificationSink;
use form_autopilot::workflow::{ExecutorDeps, HumanInputGate};
use form_autopilot::{Config, Engine, RunSpec};

pub const SCREENSHOT: &str = "iVBORw0KGgo=";

/// 假自动化驱动
///
/// - 前 `init_failures` 次 init 返回服务不可达
/// - 设置 `hold_execute` 后，execute 开始时通知 `execute_started`，等 `execute_release` 后才返回
#[derive(Default)]
pub struct FakeAutomation {
    pub init_failures: AtomicU32,
    pub inits: AtomicU32,
    pub closes: AtomicU32,
    pub instructions: Mutex<Vec<String>>,
    pub hold_execute: AtomicBool,
    pub execute_started: Notify,
    pub execute_release: Notify,
}

impl FakeAutomation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_init(times: u32) -> Arc<Self> {
        let automation = Self::default();
        automation.init_failures.store(times, Ordering::SeqCst);
        Arc::new(automation)
    }

    pub fn holding() -> Arc<Self> {
        let automation = Self::default();
        automation.hold_execute.store(true, Ordering::SeqCst);
        Arc::new(automation)
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    fn evidence() -> PageEvidence {
        PageEvidence {
            screenshot: SCREENSHOT.to_string(),
            url: "https://example.com/register".to_string(),
        }
    }
}

#[async_trait]
impl AutomationClient for FakeAutomation {
    async fn init(&self, _run_id: &str, _url: &str) -> Result<PageEvidence, AutomationError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        let remaining = self.init_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AutomationError::unreachable(
                "http://automation.test",
                "connection refused",
            ));
        }
        Ok(Self::evidence())
    }

    async fn screenshot(&self, _run_id: &str) -> Result<PageEvidence, AutomationError> {
        Ok(Self::evidence())
    }

    async fn execute(
        &self,
        _run_id: &str,
        instruction: &str,
        _timeout: Duration,
    ) -> Result<ExecuteOutcome, AutomationError> {
        if self.hold_execute.load(Ordering::SeqCst) {
            self.execute_started.notify_one();
            self.execute_release.notified().await;
        }
        self.instructions.lock().unwrap().push(instruction.to_string());
        Ok(ExecuteOutcome::succeeded(None))
    }

    async fn close(&self, _run_id: &str) -> Result<(), AutomationError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 按顺序返回预设决策；用完后返回 error 决策
///
/// 设置 `hold_decide` 后，decide 开始时通知 `decide_started`，等 `decide_release` 后才返回
#[derive(Default)]
pub struct ScriptedDecisions {
    script: Mutex<VecDeque<ActionDecision>>,
    pub requests: Mutex<Vec<DecisionRequest>>,
    pub hold_decide: AtomicBool,
    pub decide_started: Notify,
    pub decide_release: Notify,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = ActionDecision>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(decisions.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn holding(decisions: impl IntoIterator<Item = ActionDecision>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(decisions.into_iter().collect()),
            hold_decide: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionClient for ScriptedDecisions {
    async fn decide(&self, request: &DecisionRequest) -> Result<ActionDecision, DecisionError> {
        if self.hold_decide.load(Ordering::SeqCst) {
            self.decide_started.notify_one();
            self.decide_release.notified().await;
        }
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            ActionDecision::new(
                DecisionAction::Error {
                    message: "决策脚本已用完".to_string(),
                },
                "",
            )
        }))
    }
}

/// 包一层检查点存储，`fail_puts` 置位后所有写入失败
pub struct FlakyStore {
    inner: MemoryCheckpointStore,
    pub fail_puts: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCheckpointStore::new(),
            fail_puts: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn put(&self, state: &RunState) -> Result<Checkpoint, CheckpointError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CheckpointError::Storage("磁盘已满".to_string()));
        }
        self.inner.put(state).await
    }

    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.get(run_id).await
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, CheckpointError> {
        self.inner.list_run_ids().await
    }
}

/// 记录所有事件
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, RunEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, run_id: &str, event: RunEvent) {
        self.events.lock().unwrap().push((run_id.to_string(), event));
    }
}

pub struct Harness {
    pub engine: Engine,
    pub automation: Arc<FakeAutomation>,
    pub decisions: Arc<ScriptedDecisions>,
    pub sink: Arc<RecordingSink>,
    pub sessions: Arc<SessionTable>,
    pub gate: Arc<HumanInputGate>,
}

pub fn test_config() -> Config {
    Config {
        max_concurrent_runs: 4,
        default_max_retries: 3,
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
        action_timeout_secs: 5,
        ..Config::default()
    }
}

pub fn harness(automation: Arc<FakeAutomation>, decisions: Arc<ScriptedDecisions>) -> Harness {
    harness_with(automation, decisions, test_config())
}

pub fn harness_with(
    automation: Arc<FakeAutomation>,
    decisions: Arc<ScriptedDecisions>,
    config: Config,
) -> Harness {
    harness_on(automation, decisions, Arc::new(MemoryCheckpointStore::new()), config)
}

pub fn harness_on(
    automation: Arc<FakeAutomation>,
    decisions: Arc<ScriptedDecisions>,
    store: Arc<dyn CheckpointStore>,
    config: Config,
) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let sessions = Arc::new(SessionTable::new());
    let gate = Arc::new(HumanInputGate::new());
    let deps = ExecutorDeps {
        automation: automation.clone(),
        decision: decisions.clone(),
        store,
        sink: sink.clone(),
        sessions: sessions.clone(),
        gate: gate.clone(),
    };
    Harness {
        engine: Engine::new(deps, &config),
        automation,
        decisions,
        sink,
        sessions,
        gate,
    }
}

pub fn registration_spec() -> RunSpec {
    RunSpec::new("https://example.com/register")
        .with_field("full name", "Asha Rao")
        .with_field("email", "asha@example.com")
}

pub fn fill(field: &str, value: &str) -> ActionDecision {
    ActionDecision::new(
        DecisionAction::FillField {
            field: field.to_string(),
            value: value.to_string(),
        },
        "",
    )
}

pub fn click(label: &str) -> ActionDecision {
    ActionDecision::new(
        DecisionAction::ClickButton {
            label: label.to_string(),
        },
        "",
    )
}

pub fn wait_for(kind: InputKind, reason: &str) -> ActionDecision {
    ActionDecision::new(
        DecisionAction::WaitForHuman {
            kind,
            reason: reason.to_string(),
            field_id: None,
        },
        "",
    )
}

pub fn success() -> ActionDecision {
    ActionDecision::new(DecisionAction::Success { message: None }, "")
}
