//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `crawl` - 抓取入口
//! - 机构过滤、快照查找、回放或抓取、写入新快照
//!
//! ### `batch_processor` - 批量加载
//! - 全部新鲜加载，或部分缓存 + 部分新鲜加载
//! - 跨分区协调
//!
//! ### `reconcile` - 分区内协调
//! - 有限并发加载一个分区（Semaphore）
//! - 原件台账（先登记者胜出）与标记
//!
//! ## 层次关系
//!
//! ```text
//! crawl (过滤 + 缓存)
//!     ↓
//! batch_processor (分区)
//!     ↓
//! reconcile (Vec<Institution>)
//!     ↓
//! workflow::source_loader (单个 Institution)
//!     ↓
//! services (能力层：数据源 / 计算器)
//!     ↓
//! infrastructure (基础设施：预算 / 礼貌延迟 / 退避 / 重试)
//! ```

pub mod batch_processor;
pub mod crawl;
pub mod reconcile;

pub use batch_processor::{load_from_definitions, load_with_caches, reconcile_partitions};
pub use crawl::{crawl_with_options, filter_definitions, CrawlOptions, CrawlResult};
pub use reconcile::{load_partition, mark_partition, LoadMode, OriginalLedger, PartitionResult};
