use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 运行定义：目标页面和要填写的字段数据
///
/// ```toml
/// name = "state entrance exam"
/// target_url = "https://example.org/register"
/// max_retries = 3
///
/// [fields]
/// "full name" = "Asha Rao"
/// email = "asha@example.com"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    #[serde(default)]
    pub name: String,
    pub target_url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// 来源文件路径（加载时设置）
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl RunSpec {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            target_url: target_url.into(),
            fields: BTreeMap::new(),
            max_retries: None,
            file_path: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.target_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidSpec(format!(
                "目标地址必须是 http(s) URL: {}",
                self.target_url
            )));
        }
        if self.max_retries == Some(0) {
            return Err(ConfigError::InvalidSpec("max_retries 不能为 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_definition() {
        let spec: RunSpec = toml::from_str(
            r#"
            name = "demo"
            target_url = "https://example.org/register"

            [fields]
            "full name" = "Asha Rao"
            email = "asha@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(spec.fields.len(), 2);
        assert!(spec.max_retries.is_none());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_non_http_targets() {
        assert!(RunSpec::new("file:///etc/passwd").validate().is_err());
        let mut spec = RunSpec::new("https://example.org");
        spec.max_retries = Some(0);
        assert!(spec.validate().is_err());
    }
}
