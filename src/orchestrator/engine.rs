//! 运行引擎 - 编排层
//!
//! 对外暴露运行的生命周期操作：启动、提交人工输入、暂停/继续、取消、查询、崩溃恢复。
//!
//! 同一运行同一时刻最多只有一个执行循环：每个循环启动前先占用该运行的槽位，
//! 槽位在循环返回时自动释放；占用失败的请求以 `RunBusy` 拒绝，不会排队。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineResult, ProtocolError};
use crate::models::{InputKind, LogLevel, RunEvent, RunSpec, RunState, RunStatus};
use crate::utils::logging::run_label;
use crate::workflow::{ExecutorDeps, RetryPolicy, RunControl, RunExecutor};

type ActiveRuns = Arc<DashMap<String, Arc<RunControl>>>;

/// 运行槽位，离开作用域时释放
struct RunSlot {
    active: ActiveRuns,
    control: Arc<RunControl>,
}

impl RunSlot {
    fn claim(active: &ActiveRuns, run_id: &str) -> Result<Self, ProtocolError> {
        match active.entry(run_id.to_string()) {
            Entry::Occupied(_) => Err(ProtocolError::RunBusy(run_id.to_string())),
            Entry::Vacant(slot) => {
                let control = Arc::new(RunControl::new(run_id));
                slot.insert(control.clone());
                Ok(Self {
                    active: active.clone(),
                    control,
                })
            }
        }
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let control = &self.control;
        self.active
            .remove_if(control.run_id(), |_, current| Arc::ptr_eq(current, control));
    }
}

struct EngineInner {
    executor: RunExecutor,
    active: ActiveRuns,
    limiter: Arc<Semaphore>,
    default_max_retries: u32,
    input_timeout: Option<Duration>,
}

/// 运行引擎（可廉价克隆，所有克隆共享同一状态）
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// 执行循环的句柄
pub type RunHandle = JoinHandle<EngineResult<RunState>>;

impl Engine {
    pub fn new(deps: ExecutorDeps, config: &Config) -> Self {
        let executor = RunExecutor::new(deps, RetryPolicy::from_config(config), config.action_timeout());
        Self {
            inner: Arc::new(EngineInner {
                executor,
                active: Arc::new(DashMap::new()),
                limiter: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
                default_max_retries: config.default_max_retries,
                input_timeout: config.input_timeout(),
            }),
        }
    }

    /// 创建运行并写入初始检查点（pending）
    pub async fn create_run(&self, spec: &RunSpec) -> EngineResult<RunState> {
        spec.validate()?;
        let run_id = Uuid::new_v4().to_string();
        let mut state = RunState::new(run_id, spec, self.inner.default_max_retries);
        self.inner.executor.save(&mut state).await?;
        self.inner.executor.publish_status(&state, "运行已创建");
        info!(
            "[运行 {}] 🆕 创建运行 {} → {}",
            run_label(&state.run_id),
            state.name,
            state.context.target_url
        );
        Ok(state)
    }

    /// 创建并在后台启动运行
    pub async fn launch(&self, spec: &RunSpec) -> EngineResult<(String, RunHandle)> {
        let state = self.create_run(spec).await?;
        let run_id = state.run_id.clone();
        let slot = RunSlot::claim(&self.inner.active, &run_id)?;
        Ok((run_id, self.spawn_loop(slot, state)))
    }

    /// 在当前任务中驱动已存在的运行（pending / running）
    pub async fn drive_run(&self, run_id: &str) -> EngineResult<RunState> {
        let slot = RunSlot::claim(&self.inner.active, run_id)?;
        let state = self.load(run_id).await?;
        if state.is_terminal() {
            return Err(ProtocolError::AlreadyFinished {
                run_id: run_id.to_string(),
                status: state.status.to_string(),
            }
            .into());
        }
        if !matches!(state.status, RunStatus::Pending | RunStatus::Running) {
            return Err(ProtocolError::NotRunning(run_id.to_string()).into());
        }
        Self::run_loop(self.inner.clone(), slot, state).await
    }

    /// 提交人工输入并在后台恢复运行
    ///
    /// 校验失败时返回协议错误，运行状态不变。
    pub async fn submit(&self, run_id: &str, kind: InputKind, value: &str) -> EngineResult<RunHandle> {
        let (slot, state) = self.accept_input(run_id, kind, value).await?;
        Ok(self.spawn_loop(slot, state))
    }

    /// 提交人工输入并在当前任务中继续运行
    pub async fn resume(&self, run_id: &str, kind: InputKind, value: &str) -> EngineResult<RunState> {
        let (slot, state) = self.accept_input(run_id, kind, value).await?;
        Self::run_loop(self.inner.clone(), slot, state).await
    }

    async fn accept_input(
        &self,
        run_id: &str,
        kind: InputKind,
        value: &str,
    ) -> EngineResult<(RunSlot, RunState)> {
        let slot = RunSlot::claim(&self.inner.active, run_id)?;
        let mut state = self.load(run_id).await?;
        state.accept_input(kind, value)?;

        let executor = &self.inner.executor;
        executor.save(&mut state).await?;
        // 检查点写入成功后才撤下等待，失败时超时仍可触发
        executor.deps().gate.close(run_id);
        executor.publish_status(&state, "已收到人工输入");
        executor
            .deps()
            .sink
            .publish(run_id, RunEvent::log(LogLevel::Success, format!("收到 {} 输入，继续运行", kind)));
        info!("[运行 {}] ▶️ 收到 {} 输入，恢复运行", run_label(run_id), kind);
        Ok((slot, state))
    }

    /// 请求暂停：循环在下一个安全点停下
    pub fn pause(&self, run_id: &str) -> Result<(), ProtocolError> {
        match self.inner.active.get(run_id) {
            Some(control) => {
                control.request_pause();
                debug!("[运行 {}] 已请求暂停", run_label(run_id));
                Ok(())
            }
            None => Err(ProtocolError::NotRunning(run_id.to_string())),
        }
    }

    /// 继续已暂停的运行
    pub async fn resume_paused(&self, run_id: &str) -> EngineResult<RunHandle> {
        let slot = RunSlot::claim(&self.inner.active, run_id)?;
        let mut state = self.load(run_id).await?;
        if state.status != RunStatus::Paused {
            return Err(ProtocolError::NotPaused {
                run_id: run_id.to_string(),
                status: state.status.to_string(),
            }
            .into());
        }
        state.transition(RunStatus::Running)?;
        self.inner.executor.save(&mut state).await?;
        self.inner.executor.publish_status(&state, "运行已继续");
        Ok(self.spawn_loop(slot, state))
    }

    /// 取消运行
    ///
    /// 有活动循环时只设置取消信号，由循环在安全点结束；否则直接结束已保存的运行。
    pub async fn cancel(&self, run_id: &str) -> EngineResult<()> {
        if let Some(control) = self.inner.active.get(run_id) {
            control.cancel();
            info!("[运行 {}] 🛑 已请求取消", run_label(run_id));
            return Ok(());
        }

        let slot = match RunSlot::claim(&self.inner.active, run_id) {
            Ok(slot) => slot,
            Err(_) => {
                // 刚好有循环启动
                if let Some(control) = self.inner.active.get(run_id) {
                    control.cancel();
                }
                return Ok(());
            }
        };
        let state = self.load(run_id).await?;
        if state.is_terminal() {
            return Err(ProtocolError::AlreadyFinished {
                run_id: run_id.to_string(),
                status: state.status.to_string(),
            }
            .into());
        }
        self.inner.executor.finish_cancelled(state).await?;
        drop(slot);
        Ok(())
    }

    /// 查询运行的最新状态
    pub async fn status(&self, run_id: &str) -> EngineResult<RunState> {
        self.load(run_id).await
    }

    /// 所有已保存的运行
    pub async fn list_runs(&self) -> EngineResult<Vec<RunState>> {
        let store = &self.inner.executor.deps().store;
        let mut runs = Vec::new();
        for run_id in store.list_run_ids().await? {
            match store.get(&run_id).await {
                Ok(Some(checkpoint)) => runs.push(checkpoint.state),
                Ok(None) => {}
                Err(e) => warn!("跳过无法读取的检查点 {}: {}", run_id, e),
            }
        }
        Ok(runs)
    }

    /// 进程重启后继续执行中断的运行（pending / running）
    ///
    /// 等待人工输入的运行不启动循环，只重新登记等待并按剩余时间重新计时。
    pub async fn recover_interrupted(&self) -> EngineResult<Vec<(String, RunHandle)>> {
        let mut handles = Vec::new();
        for state in self.list_runs().await? {
            if state.status == RunStatus::WaitingForInput {
                self.rearm_waiting(&state);
                continue;
            }
            if !matches!(state.status, RunStatus::Pending | RunStatus::Running) {
                continue;
            }
            let Ok(slot) = RunSlot::claim(&self.inner.active, &state.run_id) else {
                continue;
            };
            info!("[运行 {}] ♻️ 恢复中断的运行", run_label(&state.run_id));
            let run_id = state.run_id.clone();
            handles.push((run_id, self.spawn_loop(slot, state)));
        }
        Ok(handles)
    }

    fn rearm_waiting(&self, state: &RunState) {
        let Some(pending) = &state.pending_input else {
            warn!("[运行 {}] 处于等待状态但没有输入请求", run_label(&state.run_id));
            return;
        };
        let gate = &self.inner.executor.deps().gate;
        if gate.ticket(&state.run_id).is_some() {
            return;
        }
        gate.open(&state.run_id, pending.clone());
        info!("[运行 {}] ♻️ 重新等待 {} 输入", run_label(&state.run_id), pending.kind);

        if let Some(limit) = self.inner.input_timeout {
            let waited = (Utc::now() - pending.requested_at).to_std().unwrap_or_default();
            Self::arm_input_timeout(self.inner.clone(), state.run_id.clone(), limit.saturating_sub(waited));
        }
    }

    /// 当前有活动循环的运行数
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.inner.active.contains_key(run_id)
    }

    async fn load(&self, run_id: &str) -> EngineResult<RunState> {
        self.inner
            .executor
            .deps()
            .store
            .get(run_id)
            .await?
            .map(|checkpoint| checkpoint.state)
            .ok_or_else(|| ProtocolError::NoSavedState(run_id.to_string()).into())
    }

    fn spawn_loop(&self, slot: RunSlot, state: RunState) -> RunHandle {
        tokio::spawn(Self::run_loop(self.inner.clone(), slot, state))
    }

    async fn run_loop(inner: Arc<EngineInner>, slot: RunSlot, state: RunState) -> EngineResult<RunState> {
        let _permit = inner.limiter.clone().acquire_owned().await.ok();
        let result = inner.executor.drive(state, &slot.control).await;
        drop(slot);

        match &result {
            Ok(state) if state.status == RunStatus::WaitingForInput => {
                if let Some(limit) = inner.input_timeout {
                    Self::arm_input_timeout(inner.clone(), state.run_id.clone(), limit);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("执行循环异常退出: {}", e),
        }
        result
    }

    /// 等待 `limit` 后仍未收到人工输入则使运行失败（未配置超时则无限等待）
    fn arm_input_timeout(inner: Arc<EngineInner>, run_id: String, limit: Duration) {
        let Some(ticket) = inner.executor.deps().gate.ticket(&run_id) else {
            return;
        };

        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if !inner.executor.deps().gate.close_if(&run_id, ticket) {
                return;
            }
            let Ok(_slot) = RunSlot::claim(&inner.active, &run_id) else {
                return;
            };
            let state = match inner.executor.deps().store.get(&run_id).await {
                Ok(Some(checkpoint)) => checkpoint.state,
                _ => return,
            };
            if state.status != RunStatus::WaitingForInput {
                return;
            }
            warn!("[运行 {}] ⌛ 等待人工输入超时", run_label(&run_id));
            if let Err(e) = inner.executor.finish_input_timeout(state).await {
                warn!("[运行 {}] 超时处理失败: {}", run_label(&run_id), e);
            }
        });
    }
}

