//! 流程层
//!
//! 定义「一个机构」的完整加载流程：准备计算器 → 拉取或回放 → 两遍写入。

pub mod context;
pub mod institution;
pub mod source_loader;

pub use context::LoadContext;
pub use institution::Institution;
pub use source_loader::{apply_records, load_from_sources, replay};
