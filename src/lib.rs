//! # Form Autopilot
//!
//! 由视觉模型驱动的网页表单自动填写引擎
//!
//! ## 架构设计
//!
//! 每个运行都是一个"观察 → 决策 → 执行"循环：截图交给模型，
//! 模型返回一个结构化动作，引擎执行后把状态写入检查点。
//! 遇到验证码或一次性验证码时运行挂起，等待人工输入后继续。
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `JsExecutor` - 页面的唯一 owner，提供 eval() 能力
//! - `CheckpointStore` - 运行状态的持久化（内存 / 文件）
//! - `SessionTable` - 运行与浏览器会话的对应关系
//!
//! ### ② 能力层（Clients / Services）
//! - `clients/` - 自动化驱动和决策服务的接口
//! - `ChromiumAutomation` / `RemoteAutomation` - 两种自动化后端
//! - `LlmDecisionService` - 视觉模型决策
//! - `NotificationSink` - 运行事件推送
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个运行"的执行循环
//! - `route` - 把决策映射为执行 / 挂起 / 结束
//! - `RetryPolicy` - 重试上限与指数退避
//! - `RunExecutor` - 循环本体
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/engine` - 运行生命周期与并发控制
//! - `orchestrator/batch_processor` - 应用装配与批量运行
//!
//! ## 模块结构

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{AutomationBackend, Config};
pub use error::{EngineError, EngineResult, ProtocolError};
pub use models::{InputKind, RunSpec, RunState, RunStatus};
pub use orchestrator::{App, BatchStats, Engine, RunHandle};
pub use workflow::ExecutorDeps;
