use chromiumoxide::Browser;
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::ConfigError;

/// 连接到已开启调试端口的浏览器
///
/// 只建立连接，不创建页面；每个运行在初始化时自己开页面。
pub async fn connect_to_browser(port: u16) -> Result<Browser, ConfigError> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        ConfigError::Browser(format!("连接 {} 失败: {}", browser_url, e))
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser
        .pages()
        .await
        .map_err(|e| ConfigError::Browser(format!("获取页面列表失败: {}", e)))?;
    debug!("浏览器已有 {} 个页面", pages.len());

    Ok(browser)
}
