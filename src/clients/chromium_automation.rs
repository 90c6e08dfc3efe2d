//! 本地 Chromium 自动化
//!
//! 把自然语言指令解析成点击 / 输入 / 选择 / 等待四类意图，再用页面脚本执行。
//! 每个运行一个独立页面，由 `JsExecutor` 持有。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Browser;
use dashmap::DashMap;
use regex::Regex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::automation::{AutomationClient, ExecuteOutcome, PageEvidence};
use crate::error::AutomationError;
use crate::infrastructure::JsExecutor;
use crate::utils::logging::run_label;

/// 指令意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// 点击按钮或链接
    Click { target: String },
    /// 勾选复选框
    Toggle { label: String },
    /// 在输入框中输入
    Type { field: String, value: String },
    /// 下拉框选择
    Select { field: String, value: String },
    /// 等待页面变化
    Wait,
}

fn type_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:type|enter)\s+'(.*)'\s+(?:into|in)\s+(.+)").expect("合法的正则")
    })
}

fn select_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bselect\s+'(.*?)'\s+(?:from|in)\s+(.+)").expect("合法的正则")
    })
}

fn click_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bclick\s+(?:on\s+)?(.+)").expect("合法的正则"))
}

fn quoted_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'([^']+)'").expect("合法的正则"))
}

fn find_field_pattern() -> &'static Regex {
    // 常量正则
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)find\s+the\s+(.+?)\s+(?:input\s+)?field").expect("合法的正则")
    })
}

/// 从指令片段中提取目标描述：优先取引号内文本，否则去掉冠词和结尾标点
fn target_hint(fragment: &str) -> String {
    if let Some(caps) = quoted_pattern().captures(fragment) {
        return caps[1].trim().to_string();
    }
    let first_sentence = fragment.split('.').next().unwrap_or(fragment);
    let trimmed = first_sentence.trim();
    let without_article = trimmed
        .strip_prefix("the ")
        .or_else(|| trimmed.strip_prefix("The "))
        .unwrap_or(trimmed);
    without_article
        .trim_end_matches(" button")
        .trim_end_matches(" field")
        .trim()
        .to_string()
}

/// 解析指令，无法识别时返回 None
pub fn parse_instruction(instruction: &str) -> Option<Intent> {
    let lower = instruction.to_lowercase();

    if let Some(caps) = type_pattern().captures(instruction) {
        let value = caps[1].to_string();
        let rest = caps[2].trim();
        // "type 'x' into it"：目标写在前半句
        let field = if rest.to_lowercase().starts_with("it") && rest.len() <= 4 {
            find_field_pattern()
                .captures(instruction)
                .map(|c| target_hint(&c[1]))
                .unwrap_or_default()
        } else {
            target_hint(rest)
        };
        return Some(Intent::Type { field, value });
    }

    if let Some(caps) = select_pattern().captures(instruction) {
        return Some(Intent::Select {
            field: target_hint(&caps[2]),
            value: caps[1].to_string(),
        });
    }

    if let Some(caps) = click_pattern().captures(instruction) {
        let target = target_hint(&caps[1]);
        if lower.contains("checkbox") {
            return Some(Intent::Toggle { label: target });
        }
        return Some(Intent::Click { target });
    }

    if lower.contains("wait") {
        return Some(Intent::Wait);
    }
    None
}

/// 生成执行意图的页面脚本，脚本返回 bool 表示是否找到目标
fn build_script(intent: &Intent) -> Option<String> {
    let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    let script = match intent {
        Intent::Type { field, value } => format!(
            r#"
            (() => {{
                const hint = {}.toLowerCase();
                const value = {};
                const matches = (el) => {{
                    const label = el.id ? document.querySelector(`label[for="${{el.id}}"]`) : null;
                    const texts = [
                        el.getAttribute('placeholder'), el.getAttribute('name'),
                        el.getAttribute('aria-label'), el.id,
                        label ? label.innerText : null,
                        el.closest('label') ? el.closest('label').innerText : null,
                    ];
                    return texts.some(t => t && t.toLowerCase().includes(hint));
                }};
                const inputs = Array.from(document.querySelectorAll('input, textarea'))
                    .filter(el => !['hidden', 'checkbox', 'radio', 'submit', 'button'].includes(el.type));
                const target = inputs.find(matches);
                if (!target) return false;
                const proto = target.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
                const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
                target.focus();
                setter.call(target, '');
                setter.call(target, value);
                target.dispatchEvent(new Event('input', {{ bubbles: true }}));
                target.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            quote(field),
            quote(value)
        ),
        Intent::Click { target } => format!(
            r#"
            (() => {{
                const hint = {}.toLowerCase();
                const candidates = Array.from(document.querySelectorAll(
                    'button, a, input[type="submit"], input[type="button"], [role="button"]'));
                const el = candidates.find(c => ((c.innerText || c.value || '').toLowerCase().includes(hint)));
                if (!el) return false;
                el.click();
                return true;
            }})()
            "#,
            quote(target)
        ),
        Intent::Toggle { label } => format!(
            r#"
            (() => {{
                const hint = {}.toLowerCase();
                const boxes = Array.from(document.querySelectorAll('input[type="checkbox"]'));
                const textOf = (box) => {{
                    const label = box.id ? document.querySelector(`label[for="${{box.id}}"]`) : null;
                    if (label) return label.innerText;
                    return box.parentElement ? box.parentElement.innerText : '';
                }};
                const box = boxes.find(b => (textOf(b) || '').toLowerCase().includes(hint))
                    || boxes.find(b => !b.checked);
                if (!box) return false;
                if (!box.checked) box.click();
                return true;
            }})()
            "#,
            quote(label)
        ),
        Intent::Select { field, value } => format!(
            r#"
            (() => {{
                const hint = {}.toLowerCase();
                const wanted = {}.toLowerCase();
                const selects = Array.from(document.querySelectorAll('select'));
                const labelOf = (s) => {{
                    const label = s.id ? document.querySelector(`label[for="${{s.id}}"]`) : null;
                    return [label ? label.innerText : '', s.name, s.id].join(' ').toLowerCase();
                }};
                const select = selects.find(s => labelOf(s).includes(hint)) || selects[0];
                if (!select) return false;
                const option = Array.from(select.options).find(o => o.text.toLowerCase().includes(wanted));
                if (!option) return false;
                select.value = option.value;
                select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            quote(field),
            quote(value)
        ),
        Intent::Wait => return None,
    };
    Some(script)
}

/// 本地 Chromium 自动化客户端
pub struct ChromiumAutomation {
    browser: Browser,
    sessions: DashMap<String, JsExecutor>,
}

impl ChromiumAutomation {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser,
            sessions: DashMap::new(),
        }
    }

    fn executor(&self, run_id: &str) -> Result<JsExecutor, AutomationError> {
        self.sessions
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AutomationError::NoSession(run_id.to_string()))
    }

    async fn evidence(executor: &JsExecutor) -> Result<PageEvidence, AutomationError> {
        Ok(PageEvidence {
            screenshot: executor.screenshot_base64().await?,
            url: executor.current_url().await?,
        })
    }

    async fn perform(executor: &JsExecutor, instruction: &str) -> Result<ExecuteOutcome, AutomationError> {
        let Some(intent) = parse_instruction(instruction) else {
            return Ok(ExecuteOutcome::failed(format!("无法理解的指令: {}", instruction)));
        };
        debug!("指令意图: {:?}", intent);

        let Some(script) = build_script(&intent) else {
            sleep(Duration::from_secs(2)).await;
            return Ok(ExecuteOutcome::succeeded(executor.screenshot_base64().await.ok()));
        };

        let found: bool = executor.eval_as(script).await?;
        if !found {
            return Ok(ExecuteOutcome::failed(format!("页面上找不到目标: {}", instruction)));
        }

        // 等待页面稳定
        sleep(Duration::from_millis(500)).await;
        Ok(ExecuteOutcome::succeeded(executor.screenshot_base64().await.ok()))
    }
}

#[async_trait]
impl AutomationClient for ChromiumAutomation {
    async fn init(&self, run_id: &str, url: &str) -> Result<PageEvidence, AutomationError> {
        info!("[运行 {}] 🌐 打开页面: {}", run_label(run_id), url);
        let page = self.browser.new_page(url).await?;
        let executor = JsExecutor::new(page);
        let evidence = Self::evidence(&executor).await?;
        if let Some(previous) = self.sessions.insert(run_id.to_string(), executor) {
            warn!("[运行 {}] 覆盖了旧的会话", run_label(run_id));
            let _ = previous.close().await;
        }
        Ok(evidence)
    }

    async fn screenshot(&self, run_id: &str) -> Result<PageEvidence, AutomationError> {
        let executor = self.executor(run_id)?;
        Self::evidence(&executor).await
    }

    async fn execute(
        &self,
        run_id: &str,
        instruction: &str,
        limit: Duration,
    ) -> Result<ExecuteOutcome, AutomationError> {
        let executor = self.executor(run_id)?;
        debug!("[运行 {}] 执行指令: {}", run_label(run_id), instruction);
        timeout(limit, Self::perform(&executor, instruction))
            .await
            .map_err(|_| AutomationError::Timeout {
                operation: "execute",
                timeout_secs: limit.as_secs(),
            })?
    }

    async fn close(&self, run_id: &str) -> Result<(), AutomationError> {
        match self.sessions.remove(run_id) {
            Some((_, executor)) => {
                debug!("[运行 {}] 关闭页面", run_label(run_id));
                executor.close().await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_patterns_compile() {
        for pattern in [
            type_pattern(),
            select_pattern(),
            click_pattern(),
            quoted_pattern(),
            find_field_pattern(),
        ] {
            assert!(!pattern.as_str().is_empty());
        }
    }

    #[test]
    fn parses_type_with_labeled_field() {
        let intent = parse_instruction(
            "Type 'asha@example.com' into the input field labeled 'email'. Clear existing text first.",
        );
        assert_eq!(
            intent,
            Some(Intent::Type {
                field: "email".into(),
                value: "asha@example.com".into()
            })
        );
    }

    #[test]
    fn parses_type_into_it_from_leading_clause() {
        let intent = parse_instruction("Find the captcha input field and type 'X7kP2' into it");
        assert_eq!(
            intent,
            Some(Intent::Type {
                field: "captcha".into(),
                value: "X7kP2".into()
            })
        );
    }

    #[test]
    fn parses_checkbox_as_toggle() {
        let intent =
            parse_instruction("Click the checkbox next to 'I hereby declare that the details are true'");
        assert_eq!(
            intent,
            Some(Intent::Toggle {
                label: "I hereby declare that the details are true".into()
            })
        );
    }

    #[test]
    fn parses_button_click_without_quotes() {
        assert_eq!(
            parse_instruction("click on the Submit button"),
            Some(Intent::Click {
                target: "Submit".into()
            })
        );
    }

    #[test]
    fn parses_select_and_wait() {
        assert_eq!(
            parse_instruction("select '12th' from class dropdown"),
            Some(Intent::Select {
                field: "class dropdown".into(),
                value: "12th".into()
            })
        );
        assert_eq!(parse_instruction("wait for the page to load"), Some(Intent::Wait));
        assert_eq!(parse_instruction("do something clever"), None);
    }

    #[test]
    fn scripts_escape_values() {
        let script = build_script(&Intent::Type {
            field: "name".into(),
            value: "O\"Brien".into(),
        })
        .unwrap();
        assert!(script.contains(r#""O\"Brien""#));
        assert!(build_script(&Intent::Wait).is_none());
    }
}
