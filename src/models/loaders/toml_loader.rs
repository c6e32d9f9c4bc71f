use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::fs;

use crate::error::{AppError, AppResult, ConfigError, SourceError};
use crate::models::{DefinitionRecord, InstitutionDefinition};
use crate::services::source::{SourceDescriptor, SourceRegistry};

/// 机构定义文件
///
/// ```toml
/// code = "hse"
/// name = "НИУ ВШЭ"
/// sequential = false
///
/// [[sources]]
/// kind = "http_json"
/// url = "https://example.org/hse/physics.json"
/// ```
#[derive(Debug, Deserialize)]
struct DefinitionFile {
    code: String,
    name: String,
    #[serde(default)]
    sequential: bool,
    #[serde(default)]
    sources: Vec<toml::Table>,
}

impl DefinitionFile {
    /// 每个 `[[sources]]` 表中除 `kind` 以外的键都是数据源参数
    fn into_record(self, path: &Path) -> AppResult<DefinitionRecord> {
        let mut sources = Vec::with_capacity(self.sources.len());
        for mut table in self.sources {
            let kind = match table.remove("kind") {
                Some(toml::Value::String(kind)) => kind,
                _ => {
                    return Err(AppError::Other(format!(
                        "{}: 数据源缺少 kind 字段",
                        path.display()
                    )))
                }
            };
            let params = serde_json::to_string(&table).map_err(|source| {
                SourceError::InvalidParams {
                    kind: kind.clone(),
                    source,
                }
            })?;
            sources.push(SourceDescriptor { kind, params });
        }
        Ok(DefinitionRecord {
            code: self.code,
            name: self.name,
            sequential: self.sequential,
            sources,
        })
    }
}

/// 从 TOML 文件加载一个机构定义
pub async fn load_definition_file(
    path: &Path,
    registry: &SourceRegistry,
) -> AppResult<InstitutionDefinition> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
    let file: DefinitionFile =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })?;
    file.into_record(path)?.into_definition(registry)
}

/// 从文件夹中加载所有机构定义（每个 `*.toml` 一个机构）
///
/// 无法解析的文件会被跳过并记录 warn；机构代码重复是错误。
/// 结果按文件名排序，保证顺序稳定。
pub async fn load_definitions_from_folder(
    folder: &Path,
    registry: &SourceRegistry,
) -> AppResult<Vec<Arc<InstitutionDefinition>>> {
    if !folder.exists() {
        return Err(ConfigError::DirectoryNotFound {
            path: folder.to_path_buf(),
        }
        .into());
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(folder)
        .await
        .map_err(|source| SourceError::ReadFailed {
            path: folder.to_path_buf(),
            source,
        })?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut definitions = Vec::new();
    let mut seen = HashSet::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_definition_file(&path, registry).await {
            Ok(definition) => {
                if !seen.insert(definition.code.clone()) {
                    return Err(ConfigError::DuplicateInstitution {
                        code: definition.code,
                    }
                    .into());
                }
                tracing::info!(
                    "[机构 {}] 成功加载 {} 个数据源",
                    definition.code,
                    definition.sources.len()
                );
                definitions.push(Arc::new(definition));
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(definitions)
}
