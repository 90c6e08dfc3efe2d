//! LLM 决策服务 - 业务能力层
//!
//! 把页面截图和运行上下文交给视觉模型，解析出下一步动作
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//!
//! ## 容错
//! - 超时、连接失败 → `DecisionError`（由执行器退避重试）
//! - 响应不是合法 JSON、缺少必要字段、动作未知 → `retry` 决策

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::prompts::{
    build_button_instruction, build_fill_instruction, build_toggle_instruction,
    build_user_context, SYSTEM_PROMPT,
};
use crate::clients::{DecisionClient, DecisionRequest};
use crate::config::Config;
use crate::error::DecisionError;
use crate::models::{ActionDecision, DecisionAction, InputKind};
use crate::utils::truncate_text;

/// 模型返回的原始决策
#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    action_type: String,
    #[serde(default)]
    checkbox_label: Option<String>,
    #[serde(default)]
    field_name: Option<String>,
    #[serde(default)]
    field_value: Option<String>,
    #[serde(default)]
    button_text: Option<String>,
    #[serde(default)]
    wait_reason: Option<String>,
    #[serde(default)]
    input_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default, alias = "stagehand_prompt")]
    instruction: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawDecision {
    /// 转换为决策；缺少必要参数时返回原因
    fn into_decision(self) -> Result<ActionDecision, String> {
        let reasoning = non_empty(self.reasoning).unwrap_or_default();
        let instruction = non_empty(self.instruction);
        let action_type = self.action_type.trim().to_lowercase().replace('-', "_");

        let (action, fallback_instruction) = match action_type.as_str() {
            "click_checkbox" | "click_toggle" => {
                let label = non_empty(self.checkbox_label).ok_or("click_checkbox 缺少 checkbox_label")?;
                let built = build_toggle_instruction(&label);
                (DecisionAction::ClickToggle { label }, built)
            }
            "fill_field" => {
                let field = non_empty(self.field_name).ok_or("fill_field 缺少 field_name")?;
                let value = self.field_value.unwrap_or_default();
                let built = build_fill_instruction(&field, &value);
                (DecisionAction::FillField { field, value }, built)
            }
            "click_button" => {
                let label = non_empty(self.button_text).ok_or("click_button 缺少 button_text")?;
                let built = build_button_instruction(&label);
                (DecisionAction::ClickButton { label }, built)
            }
            "wait_for_human" => {
                let kind = match non_empty(self.input_type) {
                    Some(raw) => InputKind::from_str(&raw)?,
                    None => InputKind::OneTimeCode,
                };
                let field_id = match kind {
                    InputKind::FreeFormField => non_empty(self.field_name),
                    _ => None,
                };
                let reason = non_empty(self.wait_reason)
                    .or_else(|| (!reasoning.is_empty()).then(|| reasoning.clone()))
                    .unwrap_or_else(|| "需要人工输入".to_string());
                (
                    DecisionAction::WaitForHuman {
                        kind,
                        reason,
                        field_id,
                    },
                    String::new(),
                )
            }
            "success" => (
                DecisionAction::Success {
                    message: (!reasoning.is_empty()).then(|| reasoning.clone()),
                },
                String::new(),
            ),
            "error" => {
                let message = non_empty(self.error_message)
                    .or_else(|| (!reasoning.is_empty()).then(|| reasoning.clone()))
                    .unwrap_or_else(|| "页面出现无法处理的错误".to_string());
                (DecisionAction::Error { message }, String::new())
            }
            "retry" => {
                let reason = non_empty(self.error_message)
                    .or_else(|| (!reasoning.is_empty()).then(|| reasoning.clone()))
                    .unwrap_or_else(|| "模型要求重试".to_string());
                (DecisionAction::Retry { reason }, String::new())
            }
            other => return Err(format!("未知的动作类型: {}", other)),
        };

        let touches_browser = action.kind().touches_browser();
        let instruction = match instruction {
            Some(text) if touches_browser => text,
            _ if touches_browser => fallback_instruction,
            _ => String::new(),
        };

        Ok(ActionDecision {
            action,
            instruction,
            reasoning,
        })
    }
}

fn json_object_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("合法的正则"))
}

/// 解析模型输出；无法解析的内容一律映射为 retry 决策
pub fn parse_decision(response_text: &str) -> ActionDecision {
    let text = response_text.trim();
    let raw = serde_json::from_str::<RawDecision>(text).or_else(|first_err| {
        // 模型常把 JSON 包在代码块或说明文字里
        match json_object_pattern().find(text) {
            Some(m) => serde_json::from_str::<RawDecision>(m.as_str()),
            None => Err(first_err),
        }
    });

    match raw {
        Ok(raw) => raw.into_decision().unwrap_or_else(|reason| {
            warn!("决策缺少必要参数: {}", reason);
            ActionDecision::retry(reason)
        }),
        Err(e) => {
            warn!("无法解析决策响应: {} | {}", e, truncate_text(text, 200));
            ActionDecision::retry(format!("无法解析决策响应: {}", e))
        }
    }
}

/// LLM 决策服务
///
/// 职责：
/// - 调用视觉模型分析截图
/// - 把模型输出转换为封闭集合内的动作
/// - 不修改运行状态，不关心流程顺序
pub struct LlmDecisionService {
    client: Client<OpenAIConfig>,
    model_name: String,
    timeout: Duration,
}

impl LlmDecisionService {
    /// 创建新的决策服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            timeout: config.decision_timeout(),
        }
    }

    fn build_messages(
        &self,
        request: &DecisionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, DecisionError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| DecisionError::RequestBuild(e.to_string()))?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: build_user_context(request),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{}", request.screenshot),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(|e| DecisionError::RequestBuild(e.to_string()))?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }

    /// 调用模型，返回原始文本
    async fn send_to_llm(&self, request: &DecisionRequest) -> Result<Option<String>, DecisionError> {
        debug!(
            "调用 LLM API，模型: {}，截图 {} 字节",
            self.model_name,
            request.screenshot.len()
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(self.build_messages(request)?)
            .temperature(0.1)
            .max_tokens(1024u32)
            .build()
            .map_err(|e| DecisionError::RequestBuild(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| {
                warn!("LLM 请求超时 ({}秒)", self.timeout.as_secs());
                DecisionError::Timeout {
                    model: self.model_name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }
            })?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                DecisionError::ApiCallFailed {
                    model: self.model_name.clone(),
                    message: e.to_string(),
                }
            })?;

        debug!("LLM API 调用成功");
        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone()))
    }
}

#[async_trait]
impl DecisionClient for LlmDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<ActionDecision, DecisionError> {
        let decision = match self.send_to_llm(request).await? {
            Some(content) if !content.trim().is_empty() => {
                debug!("LLM 响应: {}", truncate_text(&content, 200));
                parse_decision(&content)
            }
            _ => ActionDecision::retry("LLM 返回内容为空"),
        };
        debug!("决策: {} | {}", decision.kind(), decision.reasoning);
        Ok(decision)
    }
}
