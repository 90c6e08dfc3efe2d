//! 远程自动化服务客户端（HTTP）
//!
//! 服务端持有浏览器，本端只按运行标识调用：
//! - `POST   {base}/sessions`                 打开会话并导航
//! - `GET    {base}/sessions/{id}/screenshot` 截图
//! - `POST   {base}/sessions/{id}/act`        执行自然语言指令
//! - `DELETE {base}/sessions/{id}`            关闭会话

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::automation::{AutomationClient, ExecuteOutcome, PageEvidence};
use crate::config::Config;
use crate::error::AutomationError;
use crate::utils::logging::run_label;

/// 打开会话和截图接口的响应
#[derive(Debug, Deserialize)]
struct EvidenceResponse {
    screenshot: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActRequest<'a> {
    instruction: &'a str,
    timeout_ms: u64,
}

/// 远程自动化客户端
pub struct RemoteAutomation {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl RemoteAutomation {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.automation_service_url.trim_end_matches('/').to_string(),
            api_key: config.automation_api_key.clone(),
            request_timeout: config.action_timeout(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn map_send_error(&self, operation: &'static str, limit: Duration, err: reqwest::Error) -> AutomationError {
        if err.is_timeout() {
            AutomationError::Timeout {
                operation,
                timeout_secs: limit.as_secs(),
            }
        } else {
            AutomationError::unreachable(&self.base_url, err)
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        run_id: &str,
        request: RequestBuilder,
        limit: Duration,
    ) -> Result<reqwest::Response, AutomationError> {
        let response = self
            .authorize(request)
            .timeout(limit)
            .send()
            .await
            .map_err(|e| self.map_send_error(operation, limit, e))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(AutomationError::NoSession(run_id.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AutomationError::Driver(format!(
                    "{} 返回 {}: {}",
                    operation, status, body
                )))
            }
        }
    }

    async fn read_evidence(response: reqwest::Response) -> Result<PageEvidence, AutomationError> {
        let body: EvidenceResponse = response
            .json()
            .await
            .map_err(|e| AutomationError::Driver(format!("响应无法解析: {}", e)))?;
        Ok(PageEvidence {
            screenshot: body.screenshot,
            url: body.url,
        })
    }
}

#[async_trait]
impl AutomationClient for RemoteAutomation {
    async fn init(&self, run_id: &str, url: &str) -> Result<PageEvidence, AutomationError> {
        debug!("[运行 {}] 远程打开会话: {}", run_label(run_id), url);
        let request = self
            .client
            .post(self.endpoint("/sessions"))
            .json(&json!({ "sessionId": run_id, "url": url }));
        let response = self.send("init", run_id, request, self.request_timeout).await?;
        Self::read_evidence(response).await
    }

    async fn screenshot(&self, run_id: &str) -> Result<PageEvidence, AutomationError> {
        let request = self
            .client
            .get(self.endpoint(&format!("/sessions/{}/screenshot", run_id)));
        let response = self
            .send("screenshot", run_id, request, self.request_timeout)
            .await?;
        Self::read_evidence(response).await
    }

    async fn execute(
        &self,
        run_id: &str,
        instruction: &str,
        limit: Duration,
    ) -> Result<ExecuteOutcome, AutomationError> {
        debug!("[运行 {}] 远程执行: {}", run_label(run_id), instruction);
        let request = self
            .client
            .post(self.endpoint(&format!("/sessions/{}/act", run_id)))
            .json(&ActRequest {
                instruction,
                timeout_ms: limit.as_millis() as u64,
            });
        // 给服务端留出回传结果的余量
        let response = self
            .send("execute", run_id, request, limit + Duration::from_secs(5))
            .await?;
        response
            .json::<ExecuteOutcome>()
            .await
            .map_err(|e| AutomationError::Driver(format!("响应无法解析: {}", e)))
    }

    async fn close(&self, run_id: &str) -> Result<(), AutomationError> {
        let request = self
            .client
            .delete(self.endpoint(&format!("/sessions/{}", run_id)));
        match self.send("close", run_id, request, self.request_timeout).await {
            Ok(_) | Err(AutomationError::NoSession(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
