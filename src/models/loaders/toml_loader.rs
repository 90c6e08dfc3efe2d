use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::ConfigError;
use crate::models::spec::RunSpec;

/// 从 TOML 文件加载运行定义
pub async fn load_run_spec(toml_file_path: &Path) -> Result<RunSpec, ConfigError> {
    let path_str = toml_file_path.display().to_string();
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| ConfigError::SpecReadFailed {
            path: path_str.clone(),
            message: e.to_string(),
        })?;

    let mut spec: RunSpec = toml::from_str(&content).map_err(|e| ConfigError::SpecParseFailed {
        path: path_str.clone(),
        message: e.to_string(),
    })?;
    spec.validate()?;

    if spec.name.is_empty() {
        spec.name = toml_file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }
    // 设置文件路径
    spec.file_path = Some(path_str);

    Ok(spec)
}

/// 从文件夹中加载所有运行定义，解析失败的文件跳过并告警
pub async fn load_all_run_specs(folder_path: &str) -> Result<Vec<RunSpec>, ConfigError> {
    let folder = PathBuf::from(folder_path);

    let mut entries = fs::read_dir(&folder)
        .await
        .map_err(|e| ConfigError::SpecReadFailed {
            path: folder_path.to_string(),
            message: e.to_string(),
        })?;

    let mut paths = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| ConfigError::SpecReadFailed {
                path: folder_path.to_string(),
                message: e.to_string(),
            })?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut specs = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_run_spec(&path).await {
            Ok(spec) => {
                tracing::info!("成功加载运行定义, {} 个字段", spec.fields.len());
                specs.push(spec);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(specs)
}
