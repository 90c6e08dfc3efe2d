//! JS 执行器 - 基础设施层
//!
//! 持有一个运行的 page 资源，只暴露"执行 JS / 截图 / 导航"能力

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::AutomationError;

/// JS 执行器
///
/// 职责：
/// - 持有一个运行独占的 Page
/// - 暴露 eval() / 截图 / 导航能力
/// - 不理解指令语义，不处理运行流程
#[derive(Clone)]
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, AutomationError> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(
        &self,
        js_code: impl Into<String>,
    ) -> Result<T, AutomationError> {
        let json_value = self.eval(js_code).await?;
        Ok(serde_json::from_value(json_value)?)
    }

    /// 导航到指定地址并等待加载
    pub async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// 当前页面截图（PNG，base64）
    pub async fn screenshot_base64(&self) -> Result<String, AutomationError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let bytes = self.page.screenshot(params).await?;
        Ok(BASE64.encode(bytes))
    }

    /// 当前页面地址
    pub async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    /// 关闭页面，消耗执行器
    pub async fn close(self) -> Result<(), AutomationError> {
        self.page.close().await?;
        Ok(())
    }
}
