//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行的生命周期和批量调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `engine` - 运行引擎
//! - 创建运行并写入初始检查点
//! - 保证同一运行同一时刻只有一个执行循环
//! - 提交人工输入、暂停/继续、取消
//! - 进程重启后恢复中断的运行
//! - 等待人工输入超时（可选）
//!
//! ### `batch_processor` - 应用装配与批量运行
//! - 管理应用生命周期（初始化、运行）
//! - 选择自动化后端（本地 Chromium / 远程服务）
//! - 批量加载运行定义（Vec<RunSpec>）
//! - 输出全局统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<RunSpec>)
//!     ↓
//! engine (单个运行的生命周期)
//!     ↓
//! workflow::RunExecutor (观察 → 决策 → 执行 循环)
//!     ↓
//! clients / services (能力层：自动化 / 决策 / 推送)
//!     ↓
//! infrastructure (基础设施：JsExecutor / 检查点存储)
//! ```

pub mod batch_processor;
pub mod engine;

// 重新导出主要类型
pub use batch_processor::{App, BatchStats};
pub use engine::{Engine, RunHandle};
