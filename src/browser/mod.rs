//! 浏览器连接与启动

pub mod connection;
pub mod headless;

use chromiumoxide::Browser;

use crate::config::Config;
use crate::error::ConfigError;

pub use connection::connect_to_browser;
pub use headless::launch_headless_browser;

/// 根据配置获取浏览器：设置了调试端口则连接已有浏览器，否则启动无头浏览器
pub async fn open_browser(config: &Config) -> Result<Browser, ConfigError> {
    match config.browser_debug_port {
        Some(port) => connect_to_browser(port).await,
        None => launch_headless_browser(config.chrome_executable.as_deref()).await,
    }
}
