//! 抓取入口：机构过滤 → 查找快照 → 回放或抓取 → 写入新快照

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{discover_latest_snapshot, read_snapshot_file, write_snapshot_file, SnapshotCache};
use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::InstitutionDefinition;
use crate::orchestrator::batch_processor::{load_from_definitions, load_with_caches};
use crate::workflow::{Institution, LoadContext};

/// 抓取选项
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// 需要加载的机构代码，只含 "all" 时表示全部
    pub institutions: Vec<String>,
    pub exclude: Vec<String>,
    pub cache_dir: PathBuf,
    /// 快照有效期（分钟），-1 禁用缓存
    pub cache_ttl_minutes: i64,
}

impl CrawlOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            institutions: config.institutions.clone(),
            exclude: config.exclude_institutions.clone(),
            cache_dir: config.cache_dir.clone(),
            cache_ttl_minutes: config.cache_ttl_minutes,
        }
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache_ttl_minutes != -1
    }
}

/// 抓取结果
#[derive(Debug)]
pub struct CrawlResult {
    /// 按显示名称排序
    pub institutions: Vec<Institution>,
    pub cache_used: bool,
    /// 读取的快照；没有读取时为本次写入的快照
    pub cache_file: Option<PathBuf>,
}

/// 按选项抓取
///
/// # 返回
/// 只有两种情况返回错误：过滤后没有机构；缓存目录无法读取或创建
pub async fn crawl_with_options(
    definitions: &[Arc<InstitutionDefinition>],
    options: &CrawlOptions,
    ctx: &LoadContext,
) -> AppResult<CrawlResult> {
    let selected = filter_definitions(definitions, options);
    if selected.is_empty() {
        return Err(ConfigError::NothingToLoad.into());
    }
    log_crawl_start(&selected, options);

    let now = chrono::Utc::now().timestamp();
    let discovered = discover_latest_snapshot(
        &options.cache_dir,
        options.cache_ttl_minutes,
        now,
    )
    .await?;

    let mut institutions = Vec::new();
    let mut cache_used = false;
    let mut cache_file = None;

    if let Some(found) = discovered {
        match read_snapshot_file(&found.path).await {
            Ok(file) => {
                let requested: HashSet<&str> =
                    selected.iter().map(|d| d.code.as_str()).collect();
                let caches: HashMap<String, SnapshotCache> = file
                    .snapshots
                    .into_iter()
                    .filter(|s| requested.contains(s.definition.code.as_str()))
                    .map(|s| {
                        let (record, cache) = s.into_cache();
                        (record.code, cache)
                    })
                    .collect();

                if caches.is_empty() {
                    warn!(
                        "⚠️ 快照 {} 中没有请求的机构，改为全部抓取",
                        found.path.display()
                    );
                } else {
                    let (loaded, complete) = load_with_caches(&selected, caches, ctx).await;
                    if !complete {
                        info!("快照只覆盖了部分机构，其余机构已重新抓取");
                    }
                    institutions = loaded;
                    cache_used = true;
                    cache_file = Some(found.path);
                }
            }
            Err(e) => {
                warn!(
                    "⚠️ 快照 {} 无法读取，改为全部抓取: {}",
                    found.path.display(),
                    e
                );
            }
        }
    }

    if institutions.is_empty() {
        cache_used = false;
        institutions = load_from_definitions(&selected, ctx).await;
        if options.caching_enabled() && !institutions.is_empty() {
            cache_file = save_snapshot(&institutions, options, now).await?;
        }
    }

    institutions.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(CrawlResult {
        institutions,
        cache_used,
        cache_file,
    })
}

/// 按列表与排除列表过滤机构，保持定义顺序
pub fn filter_definitions(
    definitions: &[Arc<InstitutionDefinition>],
    options: &CrawlOptions,
) -> Vec<Arc<InstitutionDefinition>> {
    let all = options.institutions.len() == 1 && options.institutions[0] == "all";
    definitions
        .iter()
        .filter(|d| all || options.institutions.iter().any(|c| c == &d.code))
        .filter(|d| !options.exclude.iter().any(|c| c == &d.code))
        .cloned()
        .collect()
}

/// 写入只含有数据的机构的快照
///
/// 目录无法创建是硬错误；写入失败只记录 warn。
async fn save_snapshot(
    institutions: &[Institution],
    options: &CrawlOptions,
    now: i64,
) -> AppResult<Option<PathBuf>> {
    tokio::fs::create_dir_all(&options.cache_dir)
        .await
        .map_err(|e| AppError::cache_dir_unavailable(&options.cache_dir, e))?;

    let snapshots: Vec<_> = institutions
        .iter()
        .filter(|i| i.has_data())
        .map(|i| i.to_snapshot())
        .collect();
    if snapshots.is_empty() {
        warn!("⚠️ 没有任何机构产出数据，不写入快照");
        return Ok(None);
    }

    match write_snapshot_file(&options.cache_dir, now, snapshots).await {
        Ok(path) => Ok(Some(path)),
        Err(e) => {
            warn!("⚠️ 写入快照失败: {}", e);
            Ok(None)
        }
    }
}

// ========== 日志辅助函数 ==========

fn log_crawl_start(selected: &[Arc<InstitutionDefinition>], options: &CrawlOptions) {
    let codes: Vec<&str> = selected.iter().map(|d| d.code.as_str()).collect();
    info!("🎯 待加载机构 ({}): {}", codes.len(), codes.join(", "));
    if options.caching_enabled() {
        info!(
            "💾 缓存目录: {} (有效期 {} 分钟)",
            options.cache_dir.display(),
            options.cache_ttl_minutes
        );
    } else {
        info!("💾 缓存已禁用");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(codes: &[&str]) -> Vec<Arc<InstitutionDefinition>> {
        codes
            .iter()
            .map(|c| Arc::new(InstitutionDefinition::new(*c, c.to_uppercase(), vec![])))
            .collect()
    }

    fn options(list: &[&str], exclude: &[&str]) -> CrawlOptions {
        CrawlOptions {
            institutions: list.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            cache_dir: PathBuf::from("unused"),
            cache_ttl_minutes: -1,
        }
    }

    fn codes(list: &[Arc<InstitutionDefinition>]) -> Vec<&str> {
        list.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_filter_all_with_exclude() {
        let all = defs(&["hse", "itmo", "spbsu"]);
        let selected = filter_definitions(&all, &options(&["all"], &["itmo"]));
        assert_eq!(codes(&selected), vec!["hse", "spbsu"]);
    }

    #[test]
    fn test_filter_explicit_list_ignores_unknown() {
        let all = defs(&["hse", "itmo", "spbsu"]);
        let selected = filter_definitions(&all, &options(&["spbsu", "mgu"], &[]));
        assert_eq!(codes(&selected), vec!["spbsu"]);
    }

    #[tokio::test]
    async fn test_empty_filter_is_error() {
        let all = defs(&["hse"]);
        let ctx = LoadContext::from_config(&Config::default()).unwrap();
        let result = crawl_with_options(&all, &options(&["hse"], &["hse"]), &ctx).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::NothingToLoad))
        ));
    }
}
