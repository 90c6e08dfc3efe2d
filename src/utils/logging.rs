//! 日志工具模块
//!
//! 提供日志初始化和输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化全局日志
///
/// `RUST_LOG` 优先；否则 verbose 时为 debug，默认 info。重复调用是安全的。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 运行标识的短形式，用于日志前缀
pub fn run_label(run_id: &str) -> &str {
    match run_id.char_indices().nth(8) {
        Some((idx, _)) => &run_id[..idx],
        None => run_id,
    }
}

/// 记录程序启动信息
pub fn log_startup(max_concurrent: usize, backend: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 表单自动填写引擎");
    info!("📊 最大并发运行数: {}", max_concurrent);
    info!("🌐 自动化后端: {}", backend);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
pub fn log_batch_start(total: usize, max_concurrent: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始批量运行: 共 {} 个", total);
    info!("📋 最大并发: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 打印批次统计信息
pub fn print_batch_stats(succeeded: usize, failed: usize, waiting: usize, cancelled: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 批量运行统计");
    info!("完成时间: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", succeeded, total);
    info!("❌ 失败: {}", failed);
    info!("⏸️ 等待人工输入: {}", waiting);
    info!("🛑 已取消: {}", cancelled);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
