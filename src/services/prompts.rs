//! 决策提示词与指令模板

use crate::clients::DecisionRequest;

/// 验证码自动识别连续失败多少次后转人工
pub const CAPTCHA_ESCALATION_THRESHOLD: u32 = 3;

/// 系统提示词
pub const SYSTEM_PROMPT: &str = r#"你是一个网页表单自动化助手。你会看到当前页面的截图，需要判断下一步唯一最合适的动作。

## 工作方式
1. 看懂截图里的页面状态
2. 对照还没有填写的用户数据
3. 只决定一个动作
4. 给出交给浏览器驱动的英文指令（instruction）

## 规则（严格按顺序检查）

### 1. 弹窗优先
页面上有任何弹窗、对话框时，先点击 "OK" / "Close" / "Continue" / "X" 关闭它。
例如 "OTP has been sent" 的提示框，点 "OK"。返回 action_type: "click_button"。

### 2. 一次性验证码只能由人工提供
出现以下任一情况时返回 wait_for_human，input_type 为 "otp"：
- 4-6 个分开的空白数字输入框
- "Enter OTP"、"verification code"、"OTP sent to"、"Verify mobile otp" 等文字
- "Verify" / "Verify OTP" 按钮
不要用手机号等用户数据去填验证码框。wait_reason 写清楚需要哪种验证码，instruction 留空。

### 3. 图片验证码由你自己识别
看到验证码图片时，仔细读出字符（区分大小写，不加空格），返回 fill_field：
- field_name: "captcha"
- field_value: 你读出的字符
如果上下文提示验证码已经连续识别失败，改为返回 wait_for_human，input_type 为 "captcha"。

### 4. 复选框
有未勾选的声明、条款复选框时先勾选，返回 click_checkbox 和 checkbox_label。

### 5. 逐个填写字段
提交前检查整页是否还有空输入框，一次只填一个剩余字段。
验证码输入框是空的说明上次识别错了，重新识别并填写，不要点提交。
页面要求的信息不在用户数据里时，返回 wait_for_human，input_type 为 "custom"，field_name 写该字段的标签。

### 6. 全部填完才提交
所有字段（包括验证码）都填好后，才点击 Submit / Get OTP / Continue。

### 7. 成功判定要谨慎
只有看到 "Registration successful"、"Application submitted successfully" 这类最终确认才返回 success。
"OTP sent successfully"、"Captcha verified" 都不是最终成功。"Invalid captcha" 之类的错误提示说明要重新识别验证码。

## 输出格式
只输出一个 JSON 对象：
{
  "action_type": "click_checkbox" | "fill_field" | "click_button" | "wait_for_human" | "success" | "error" | "retry",
  "checkbox_label": "...",
  "field_name": "...",
  "field_value": "...",
  "button_text": "...",
  "input_type": "otp" | "captcha" | "custom",
  "wait_reason": "...",
  "error_message": "...",
  "instruction": "...",
  "reasoning": "..."
}
与动作无关的字段可以省略。"#;

/// 构建用户消息：剩余字段、已填字段、当前状态与附加提示
pub fn build_user_context(request: &DecisionRequest) -> String {
    let already_filled = if request.already_filled.is_empty() {
        "暂无".to_string()
    } else {
        request.already_filled.join(", ")
    };
    let remaining =
        serde_json::to_string_pretty(&request.remaining_fields).unwrap_or_else(|_| "{}".to_string());

    let mut notes = Vec::new();
    if request.already_filled.iter().any(|f| f == "captcha") {
        notes.push("验证码已经填写过，除非页面提示验证码错误，否则不要再次填写，直接点击提交按钮。".to_string());
    }
    if request.captcha_fail_count >= CAPTCHA_ESCALATION_THRESHOLD {
        notes.push(format!(
            "验证码自动识别已失败 {} 次。如果页面上有验证码，返回 wait_for_human，input_type 为 \"captcha\"。",
            request.captcha_fail_count
        ));
    }
    if let Some(error) = &request.last_error {
        notes.push(format!("上一个动作执行失败: {}。换一种方式完成同一目标。", error));
    }
    if let Some(input) = &request.human_input {
        notes.push(format!(
            "已收到人工提供的 {} (字段: {})。返回 fill_field，field_name 为 \"{}\"，field_value 留空，系统会自动填入该值。",
            input.kind, input.field_id, input.field_id
        ));
    }

    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!(
            "\n## 注意\n{}\n",
            notes
                .iter()
                .map(|n| format!("- {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    format!(
        r#"## 用户数据
已填写: {}
待填写: {}

## 当前状态
页面地址: {}
重试次数: {}
验证码失败次数: {}
{}
## 任务
分析截图，给出唯一的下一步动作。已填写列表中的字段不要重复填写。
"#,
        already_filled,
        remaining,
        if request.page_url.is_empty() {
            "未知"
        } else {
            request.page_url.as_str()
        },
        request.retry_count,
        request.captcha_fail_count,
        notes
    )
}

/// 填写字段的指令
pub fn build_fill_instruction(field_name: &str, value: &str) -> String {
    let lower = field_name.to_lowercase();

    if lower.contains("confirm") || lower.contains("re-enter") || lower.contains("retype") {
        return format!(
            "Type '{}' into the confirmation field labeled '{}'",
            value, field_name
        );
    }
    if lower.contains("email") {
        return format!(
            "Type '{}' into the email input field labeled '{}'. Clear any existing text first.",
            value, field_name
        );
    }
    if lower.contains("phone") || lower.contains("mobile") {
        return format!(
            "Type '{}' into the phone/mobile number field labeled '{}'",
            value, field_name
        );
    }
    if lower.contains("date") || lower.contains("dob") {
        return format!(
            "Enter '{}' into the date of birth field labeled '{}'",
            value, field_name
        );
    }
    format!(
        "Type '{}' into the input field labeled '{}'. Clear existing text first.",
        value, field_name
    )
}

/// 勾选复选框的指令（标签过长时截断）
pub fn build_toggle_instruction(label: &str) -> String {
    let short: String = if label.chars().count() > 100 {
        format!("{}...", label.chars().take(100).collect::<String>())
    } else {
        label.to_string()
    };
    format!("Click the checkbox next to '{}'", short)
}

/// 点击按钮的指令
pub fn build_button_instruction(button_text: &str) -> String {
    format!("Click the button labeled '{}'", button_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::chromium_automation::{parse_instruction, Intent};
    use std::collections::BTreeMap;

    #[test]
    fn fill_instructions_are_understood_by_local_driver() {
        for field in ["email", "mobile number", "date of birth", "full name", "confirm password"] {
            let instruction = build_fill_instruction(field, "v1");
            match parse_instruction(&instruction) {
                Some(Intent::Type { field: parsed, value }) => {
                    assert_eq!(parsed, field);
                    assert_eq!(value, "v1");
                }
                other => panic!("{} -> {:?}", instruction, other),
            }
        }
    }

    #[test]
    fn long_toggle_labels_are_truncated() {
        let label = "I".repeat(150);
        let instruction = build_toggle_instruction(&label);
        assert!(instruction.ends_with("...'"));
        assert!(matches!(parse_instruction(&instruction), Some(Intent::Toggle { .. })));
    }

    #[test]
    fn button_instruction_parses_as_click() {
        assert_eq!(
            parse_instruction(&build_button_instruction("Get OTP")),
            Some(Intent::Click {
                target: "Get OTP".into()
            })
        );
    }

    #[test]
    fn context_escalates_captcha_after_threshold() {
        let mut request = DecisionRequest {
            remaining_fields: BTreeMap::from([("email".to_string(), "a@b.c".to_string())]),
            already_filled: vec!["captcha".into()],
            ..Default::default()
        };
        let context = build_user_context(&request);
        assert!(context.contains("验证码已经填写过"));
        assert!(!context.contains("wait_for_human"));

        request.captcha_fail_count = CAPTCHA_ESCALATION_THRESHOLD;
        assert!(build_user_context(&request).contains("wait_for_human"));
    }
}
