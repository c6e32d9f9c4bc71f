//! # Rating Ingest
//!
//! 并发抓取多所高校的录取排名表，并在机构之间协调考生的原件提交状态
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 进程级共享的限流服务，显式构造后注入
//! - `ConcurrencyBudget` - 全局 + 机构级并发请求预算
//! - `PolitenessCoordinator` - 按批次的 micro / main 礼貌延迟
//! - `BackoffLimiter` - 脆弱机构的 429 逐级退避
//! - `RetryPolicy` - 单个数据源的有界指数退避重试
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `HeadingSource` / `DataReceiver` - 数据源与接收端能力
//! - `SourceRegistry` - 按类型标签重建数据源
//! - `Calculator` - 下游录取模拟引擎的能力边界
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个机构"的完整加载流程
//! - `Institution` - 定义 + 计算器 + 快照缓存
//! - `source_loader` - 多数据源 → 有界队列 → 单一消费者 → 两遍写入
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/reconcile` - 有限并发加载一个分区，原件台账与标记
//! - `orchestrator/batch_processor` - 全部新鲜 / 部分缓存两种批量加载
//! - `orchestrator/crawl` - 过滤、快照查找与写入
//!
//! ## 模块结构
//!
//! - `app` - 应用入口：加载定义、运行抓取、输出统计
//! - `cache` - 快照编码、读写与按 TTL 查找
//! - `config` - 默认值 + 环境变量覆盖
//! - `error` - 分层错误类型
//! - `models` - 数据模型与 TOML 机构定义加载
//! - `utils` - 日志初始化与输出辅助

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::{Config, PolitenessProfile};
pub use error::{AppError, AppResult};
pub use infrastructure::{RetryPolicy, Throttle};
pub use models::{ApplicationData, Capacities, Competition, HeadingData, InstitutionDefinition};
pub use orchestrator::{
    crawl_with_options, load_from_definitions, load_with_caches, CrawlOptions, CrawlResult,
};
pub use services::{Calculator, DataReceiver, HeadingSource, SourceContext, SourceRegistry};
pub use utils::init_logging;
pub use workflow::{Institution, LoadContext};
