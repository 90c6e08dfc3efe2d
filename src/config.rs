use std::str::FromStr;
use std::time::Duration;

/// 浏览器自动化后端
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutomationBackend {
    /// 本地 Chromium（chromiumoxide 驱动）
    Chromium,
    /// 远程自动化服务（HTTP）
    Remote,
}

impl FromStr for AutomationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "local" => Ok(AutomationBackend::Chromium),
            "remote" | "service" => Ok(AutomationBackend::Remote),
            other => Err(format!("未知的自动化后端: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时执行的运行数量上限
    pub max_concurrent_runs: usize,
    /// 自动化后端
    pub automation_backend: AutomationBackend,
    /// 浏览器调试端口（设置后连接已有浏览器，否则启动无头浏览器）
    pub browser_debug_port: Option<u16>,
    /// 浏览器可执行文件路径
    pub chrome_executable: Option<String>,
    /// 远程自动化服务地址
    pub automation_service_url: String,
    /// 远程自动化服务密钥
    pub automation_api_key: Option<String>,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 单次决策请求超时（秒）
    pub decision_timeout_secs: u64,
    /// 单个浏览器动作超时（秒）
    pub action_timeout_secs: u64,
    // --- 运行策略 ---
    /// 检查点目录
    pub checkpoint_dir: String,
    /// 默认最大重试次数
    pub default_max_retries: u32,
    /// 退避基数（毫秒）
    pub backoff_base_ms: u64,
    /// 退避上限（毫秒）
    pub backoff_cap_ms: u64,
    /// 等待人工输入的超时（秒），不设置则无限等待
    pub input_timeout_secs: Option<u64>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 100,
            automation_backend: AutomationBackend::Chromium,
            browser_debug_port: None,
            chrome_executable: None,
            automation_service_url: "http://localhost:3000".to_string(),
            automation_api_key: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            decision_timeout_secs: 60,
            action_timeout_secs: 30,
            checkpoint_dir: "checkpoints".to_string(),
            default_max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            input_timeout_secs: None,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_runs: env_parse("MAX_CONCURRENT_RUNS").unwrap_or(default.max_concurrent_runs),
            automation_backend: env_parse("AUTOMATION_BACKEND").unwrap_or(default.automation_backend),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").or(default.browser_debug_port),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            automation_service_url: std::env::var("AUTOMATION_SERVICE_URL").unwrap_or(default.automation_service_url),
            automation_api_key: std::env::var("AUTOMATION_API_KEY").ok().or(default.automation_api_key),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            decision_timeout_secs: env_parse("DECISION_TIMEOUT_SECS").unwrap_or(default.decision_timeout_secs),
            action_timeout_secs: env_parse("ACTION_TIMEOUT_SECS").unwrap_or(default.action_timeout_secs),
            checkpoint_dir: std::env::var("CHECKPOINT_DIR").unwrap_or(default.checkpoint_dir),
            default_max_retries: env_parse("DEFAULT_MAX_RETRIES").unwrap_or(default.default_max_retries),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS").unwrap_or(default.backoff_base_ms),
            backoff_cap_ms: env_parse("BACKOFF_CAP_MS").unwrap_or(default.backoff_cap_ms),
            input_timeout_secs: env_parse("INPUT_TIMEOUT_SECS").or(default.input_timeout_secs),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    pub fn input_timeout(&self) -> Option<Duration> {
        self.input_timeout_secs.map(Duration::from_secs)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
