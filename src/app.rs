use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{load_definitions_from_folder, InstitutionDefinition};
use crate::orchestrator::{crawl_with_options, CrawlOptions, CrawlResult};
use crate::services::SourceRegistry;
use crate::utils::logging::{self, InstitutionSummary};
use crate::workflow::LoadContext;

/// 应用主结构
pub struct App {
    config: Config,
    definitions: Vec<Arc<InstitutionDefinition>>,
    ctx: LoadContext,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::log_startup(&config);

        let registry = SourceRegistry::with_builtin();
        info!("\n📁 正在扫描机构定义...");
        let definitions = load_definitions_from_folder(&config.definitions_folder, &registry)
            .await
            .with_context(|| {
                format!(
                    "无法加载机构定义: {}",
                    config.definitions_folder.display()
                )
            })?;
        info!("✓ 找到 {} 个机构定义", definitions.len());

        let ctx = LoadContext::from_config(&config)?;

        Ok(Self {
            config,
            definitions,
            ctx,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<CrawlResult> {
        if self.definitions.is_empty() {
            warn!("⚠️ 没有找到机构定义文件，程序结束");
        }

        // Ctrl-C 取消所有进行中的请求
        let cancel = self.ctx.cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ 收到中断信号，正在取消请求...");
                cancel.cancel();
            }
        });

        let options = CrawlOptions::from_config(&self.config);
        let result = crawl_with_options(&self.definitions, &options, &self.ctx).await;
        watcher.abort();
        let result = result?;

        let summaries: Vec<InstitutionSummary<'_>> = result
            .institutions
            .iter()
            .map(|inst| InstitutionSummary {
                code: inst.code(),
                name: inst.name(),
                headings: inst.calculator().map_or(0, |c| c.heading_count()),
                applications: inst.calculator().map_or(0, |c| c.application_count()),
            })
            .collect();
        logging::log_crawl_complete(&summaries, result.cache_used);
        if let Some(path) = &result.cache_file {
            info!("\n快照文件: {}", path.display());
        }

        Ok(result)
    }
}
