//! 应用装配与批量运行 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：启动日志、选择自动化后端、创建检查点存储和事件推送
//! 2. **批量加载**：扫描文件夹中的所有运行定义（`Vec<RunSpec>`）
//! 3. **并发控制**：交给引擎的并发上限（Semaphore）
//! 4. **全局统计**：按最终状态汇总所有运行

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::browser;
use crate::clients::{AutomationClient, ChromiumAutomation, RemoteAutomation};
use crate::config::{AutomationBackend, Config};
use crate::error::EngineResult;
use crate::infrastructure::{FileCheckpointStore, SessionTable};
use crate::models::{load_all_run_specs, RunSpec, RunStatus};
use crate::orchestrator::engine::Engine;
use crate::services::{BroadcastSink, FanoutSink, LlmDecisionService, LogSink, RunNotification};
use crate::utils::logging::{log_batch_start, log_startup, print_batch_stats, run_label};
use crate::workflow::{ExecutorDeps, HumanInputGate};

/// 应用主结构
pub struct App {
    config: Config,
    engine: Engine,
    events: Arc<BroadcastSink>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> EngineResult<Self> {
        let backend = match config.automation_backend {
            AutomationBackend::Chromium => "chromium",
            AutomationBackend::Remote => "remote",
        };
        log_startup(config.max_concurrent_runs, backend);

        let automation: Arc<dyn AutomationClient> = match config.automation_backend {
            AutomationBackend::Chromium => {
                let browser = browser::open_browser(&config).await?;
                Arc::new(ChromiumAutomation::new(browser))
            }
            AutomationBackend::Remote => {
                info!("🔗 远程自动化服务: {}", config.automation_service_url);
                Arc::new(RemoteAutomation::new(&config))
            }
        };

        Self::assemble(config, automation)
    }

    /// 只读装配：不启动浏览器，用于查询、取消等不执行动作的命令
    pub fn for_inspection(config: Config) -> EngineResult<Self> {
        let automation = Arc::new(RemoteAutomation::new(&config));
        Self::assemble(config, automation)
    }

    fn assemble(config: Config, automation: Arc<dyn AutomationClient>) -> EngineResult<Self> {
        let store = FileCheckpointStore::new(&config.checkpoint_dir)?;
        info!("💾 检查点目录: {}", store.dir().display());

        let events = Arc::new(BroadcastSink::new(256));
        let sink = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(events.clone());

        let deps = ExecutorDeps {
            automation,
            decision: Arc::new(LlmDecisionService::new(&config)),
            store: Arc::new(store),
            sink: Arc::new(sink),
            sessions: Arc::new(SessionTable::new()),
            gate: Arc::new(HumanInputGate::new()),
        };
        let engine = Engine::new(deps, &config);

        Ok(Self {
            config,
            engine,
            events,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 订阅所有运行的事件
    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.events.subscribe()
    }

    /// 批量运行文件夹中的所有运行定义
    pub async fn run_batch(&self, folder: &str) -> EngineResult<BatchStats> {
        info!("\n📁 正在扫描运行定义: {}", folder);
        let specs = load_all_run_specs(folder).await?;
        if specs.is_empty() {
            warn!("⚠️ 没有找到运行定义文件，程序结束");
            return Ok(BatchStats::default());
        }
        self.run_specs(specs).await
    }

    /// 并发启动一组运行并等待它们结束或挂起
    pub async fn run_specs(&self, specs: Vec<RunSpec>) -> EngineResult<BatchStats> {
        log_batch_start(specs.len(), self.config.max_concurrent_runs);

        let mut stats = BatchStats {
            total: specs.len(),
            ..Default::default()
        };
        let mut handles = Vec::new();
        for spec in &specs {
            match self.engine.launch(spec).await {
                Ok(launched) => handles.push(launched),
                Err(e) => {
                    error!("❌ 无法启动 {}: {}", spec.name, e);
                    stats.failed += 1;
                }
            }
        }

        for (run_id, handle) in handles {
            match handle.await {
                Ok(Ok(state)) => stats.record(state.status),
                Ok(Err(e)) => {
                    error!("[运行 {}] ❌ 执行失败: {}", run_label(&run_id), e);
                    stats.failed += 1;
                }
                Err(e) => {
                    error!("[运行 {}] 任务执行失败: {}", run_label(&run_id), e);
                    stats.failed += 1;
                }
            }
        }

        print_batch_stats(
            stats.succeeded,
            stats.failed,
            stats.waiting,
            stats.cancelled,
            stats.total,
        );
        Ok(stats)
    }
}

/// 批量运行统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub waiting: usize,
    pub paused: usize,
    pub cancelled: usize,
}

impl BatchStats {
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Succeeded => self.succeeded += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Cancelled => self.cancelled += 1,
            RunStatus::WaitingForInput => self.waiting += 1,
            RunStatus::Paused => self.paused += 1,
            RunStatus::Pending | RunStatus::Running => {}
        }
    }
}
