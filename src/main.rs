use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use form_autopilot::models::load_run_spec;
use form_autopilot::utils::logging::{self, run_label};
use form_autopilot::{App, Config, Engine, InputKind, RunState, RunStatus};

#[derive(Parser)]
#[command(name = "form-autopilot", version, about = "视觉模型驱动的网页表单自动填写")]
struct Cli {
    /// 显示详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 检查点目录（覆盖 CHECKPOINT_DIR）
    #[arg(long, global = true)]
    checkpoint_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 执行单个运行定义，需要人工输入时从标准输入读取
    Run { spec: PathBuf },
    /// 并发执行文件夹中的所有运行定义
    Batch {
        #[arg(default_value = "runs")]
        folder: String,
    },
    /// 为等待输入的运行提交人工输入并继续
    Resume {
        run_id: String,
        /// one-time-code / challenge-solution / free-form-field
        kind: InputKind,
        value: String,
    },
    /// 继续已暂停的运行
    Continue { run_id: String },
    /// 取消运行
    Cancel { run_id: String },
    /// 查看运行状态，不指定时列出所有运行
    Status { run_id: Option<String> },
    /// 继续进程中断时仍在执行的运行
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let mut config = Config::from_env();
    config.verbose_logging |= cli.verbose;
    if let Some(dir) = cli.checkpoint_dir {
        config.checkpoint_dir = dir;
    }

    // 初始化日志
    logging::init(config.verbose_logging);

    match cli.command {
        Command::Run { spec } => {
            let spec = load_run_spec(&spec).await?;
            let app = App::initialize(config).await?;
            let (run_id, handle) = app.engine().launch(&spec).await?;
            watch_interrupt(app.engine().clone(), run_id.clone());
            let state = handle.await.context("执行循环异常结束")??;
            let state = answer_until_settled(app.engine(), state).await?;
            print_state(&state);
        }
        Command::Batch { folder } => {
            let app = App::initialize(config).await?;
            app.run_batch(&folder).await?;
        }
        Command::Resume { run_id, kind, value } => {
            let app = App::initialize(config).await?;
            let state = app.engine().resume(&run_id, kind, &value).await?;
            let state = answer_until_settled(app.engine(), state).await?;
            print_state(&state);
        }
        Command::Continue { run_id } => {
            let app = App::initialize(config).await?;
            watch_interrupt(app.engine().clone(), run_id.clone());
            let state = app.engine().resume_paused(&run_id).await?.await??;
            let state = answer_until_settled(app.engine(), state).await?;
            print_state(&state);
        }
        Command::Cancel { run_id } => {
            let app = App::for_inspection(config)?;
            app.engine().cancel(&run_id).await?;
            print_state(&app.engine().status(&run_id).await?);
        }
        Command::Status { run_id } => {
            let app = App::for_inspection(config)?;
            match run_id {
                Some(run_id) => print_state(&app.engine().status(&run_id).await?),
                None => {
                    let runs = app.engine().list_runs().await?;
                    if runs.is_empty() {
                        info!("没有保存的运行");
                    }
                    for state in &runs {
                        print_summary(state);
                    }
                }
            }
        }
        Command::Recover => {
            let app = App::initialize(config).await?;
            let handles = app.engine().recover_interrupted().await?;
            if handles.is_empty() {
                info!("没有需要恢复的运行");
            }
            for (run_id, handle) in handles {
                match handle.await {
                    Ok(Ok(state)) => print_summary(&state),
                    Ok(Err(e)) => warn!("[运行 {}] 恢复失败: {}", run_label(&run_id), e),
                    Err(e) => warn!("[运行 {}] 任务执行失败: {}", run_label(&run_id), e),
                }
            }
        }
    }

    Ok(())
}

/// Ctrl-C 时请求暂停，循环在下一个安全点停下并保存
fn watch_interrupt(engine: Engine, run_id: String) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏸️ 收到中断信号，正在暂停运行");
            let _ = engine.pause(&run_id);
        }
    });
}

/// 运行挂起时在终端提示人工输入，直到运行结束或暂停
async fn answer_until_settled(engine: &Engine, mut state: RunState) -> Result<RunState> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while state.status == RunStatus::WaitingForInput {
        let Some(pending) = state.pending_input.clone() else {
            bail!("运行 {} 处于等待状态但没有输入请求", state.run_id);
        };
        println!("\n🙋 需要人工输入 ({}): {}", pending.kind, pending.reason);
        if pending.media.is_some() {
            println!("   （页面截图已保存在检查点中）");
        }
        println!("   请输入后回车（直接回车取消运行）：");

        let Some(line) = lines.next_line().await? else {
            bail!("标准输入已关闭，运行 {} 保持等待状态", state.run_id);
        };
        let value = line.trim();
        if value.is_empty() {
            engine.cancel(&state.run_id).await?;
            return Ok(engine.status(&state.run_id).await?);
        }
        state = engine.resume(&state.run_id, pending.kind, value).await?;
    }
    Ok(state)
}

fn print_summary(state: &RunState) {
    println!(
        "{}  {:<17} {:>3}%  {}",
        state.run_id,
        state.status.to_string(),
        state.progress,
        state.name
    );
}

fn print_state(state: &RunState) {
    print_summary(state);
    println!("  当前节点: {}", state.current_node.as_str());
    println!("  重试次数: {}/{}", state.retry_count, state.max_retries);
    println!("  已执行动作: {}", state.action_history.len());
    if let Some(message) = &state.result_message {
        println!("  结果: {}", message);
    }
    if let Some(error) = &state.last_error {
        println!("  最近错误: {}", error);
    }
    if let Some(pending) = &state.pending_input {
        println!("  等待输入: {} ({})", pending.kind, pending.reason);
    }
}
