//! 敏感值脱敏

const SENSITIVE_MARKERS: [&str; 8] = [
    "phone", "mobile", "email", "password", "otp", "captcha", "code", "aadhaar",
];

/// 字段名是否属于敏感字段
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// 生成写入动作历史的值：敏感字段为 `***`，其他截断到 10 个字符
pub fn mask_value(key: &str, value: &str) -> String {
    if is_sensitive_key(key) {
        "***".to_string()
    } else {
        value.chars().take(10).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_contact_fields() {
        assert_eq!(mask_value("Email Address", "a@b.com"), "***");
        assert_eq!(mask_value("mobile_no", "9999999999"), "***");
        assert_eq!(mask_value("otp", "483920"), "***");
    }

    #[test]
    fn truncates_plain_fields() {
        assert_eq!(mask_value("full name", "Alexandria Ocasio"), "Alexandria");
        assert_eq!(mask_value("city", "Pune"), "Pune");
    }
}
