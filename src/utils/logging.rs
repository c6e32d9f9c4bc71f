//! 日志工具模块
//!
//! 提供日志初始化和运行摘要输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志订阅器
///
/// 优先使用 `RUST_LOG`，否则根据 `verbose` 选择 `debug` 或 `info`。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 录取名单并发抓取模式");
    info!("📊 全局并发请求上限: {}", config.global_http_max_concurrent);
    info!("🏫 同时加载机构数: {}", config.max_concurrent_institutions);
    if config.cache_ttl_minutes == -1 {
        info!("💾 快照缓存: 已禁用");
    } else {
        info!(
            "💾 快照缓存: {} (有效期 {} 分钟)",
            config.cache_dir.display(),
            config.cache_ttl_minutes
        );
    }
    info!("{}", "=".repeat(60));
}

/// 单个机构的加载摘要
pub struct InstitutionSummary<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub headings: usize,
    pub applications: usize,
}

/// 打印最终统计信息
pub fn log_crawl_complete(summaries: &[InstitutionSummary<'_>], cache_used: bool) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部加载完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    for summary in summaries {
        info!(
            "[机构 {}] {}: 专业 {}, 申请 {}",
            summary.code,
            truncate_text(summary.name, 40),
            summary.headings,
            summary.applications
        );
    }
    let empty = summaries
        .iter()
        .filter(|s| s.headings == 0 && s.applications == 0)
        .count();
    info!("✅ 已加载机构: {}", summaries.len());
    if empty > 0 {
        info!("❌ 无数据机构: {}", empty);
    }
    info!("💾 使用缓存: {}", if cache_used { "是" } else { "否" });
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
