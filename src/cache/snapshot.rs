//! 快照缓存
//!
//! 每个机构在新鲜加载时收到的全部记录都会追加到自己的 [`SnapshotCache`]。
//! 一批机构的快照用 bincode（serde 模式）写成单个二进制文件，
//! 数据源以「类型标签 + JSON 参数」保存，按名字而不是注册顺序解码。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult, CacheError};
use crate::models::{ApplicationData, DefinitionRecord, HeadingData};

/// 快照文件格式版本
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// 快照文件扩展名
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

/// 单个机构在一次加载中收到的原始记录（只追加）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotCache {
    headings: Vec<HeadingData>,
    applications: Vec<ApplicationData>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(headings: Vec<HeadingData>, applications: Vec<ApplicationData>) -> Self {
        Self {
            headings,
            applications,
        }
    }

    pub fn save_heading(&mut self, heading: HeadingData) {
        self.headings.push(heading);
    }

    pub fn save_application(&mut self, application: ApplicationData) {
        self.applications.push(application);
    }

    pub fn reset(&mut self) {
        self.headings.clear();
        self.applications.clear();
    }

    pub fn headings(&self) -> &[HeadingData] {
        &self.headings
    }

    pub fn applications(&self) -> &[ApplicationData] {
        &self.applications
    }

    /// 没有任何记录
    pub fn is_empty(&self) -> bool {
        self.headings.is_empty() && self.applications.is_empty()
    }
}

/// 单个机构的快照：定义 + 原始记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionSnapshot {
    pub definition: DefinitionRecord,
    pub headings: Vec<HeadingData>,
    pub applications: Vec<ApplicationData>,
}

impl InstitutionSnapshot {
    pub fn new(definition: DefinitionRecord, cache: &SnapshotCache) -> Self {
        Self {
            definition,
            headings: cache.headings.clone(),
            applications: cache.applications.clone(),
        }
    }

    pub fn into_cache(self) -> (DefinitionRecord, SnapshotCache) {
        (
            self.definition,
            SnapshotCache::from_records(self.headings, self.applications),
        )
    }
}

/// 快照文件的完整内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub format_version: u32,
    /// 抓取时间（Unix 秒）
    pub captured_at: i64,
    pub snapshots: Vec<InstitutionSnapshot>,
}

/// 编码一批机构快照
pub fn serialize_snapshots(
    snapshots: Vec<InstitutionSnapshot>,
    captured_at: i64,
) -> AppResult<Vec<u8>> {
    let file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        captured_at,
        snapshots,
    };
    Ok(bincode::serde::encode_to_vec(
        &file,
        bincode::config::standard(),
    )?)
}

/// 解码快照文件，拒绝不认识的格式版本
pub fn deserialize_snapshots(bytes: &[u8]) -> AppResult<SnapshotFile> {
    let (file, _): (SnapshotFile, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if file.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: file.format_version,
            expected: SNAPSHOT_FORMAT_VERSION,
        }
        .into());
    }
    Ok(file)
}

/// 快照文件名：`<unix_ts>.snapshot`
pub fn snapshot_file_name(captured_at: i64) -> String {
    format!("{}.{}", captured_at, SNAPSHOT_EXTENSION)
}

/// 写入快照文件
///
/// # 返回
/// 写入的文件路径
pub async fn write_snapshot_file(
    dir: &Path,
    captured_at: i64,
    snapshots: Vec<InstitutionSnapshot>,
) -> AppResult<PathBuf> {
    let count = snapshots.len();
    let bytes = serialize_snapshots(snapshots, captured_at)?;
    let path = dir.join(snapshot_file_name(captured_at));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| AppError::cache_io(&path, e))?;
    info!(
        "💾 快照已写入: {} ({} 个机构, {} 字节)",
        path.display(),
        count,
        bytes.len()
    );
    Ok(path)
}

/// 读取快照文件
pub async fn read_snapshot_file(path: &Path) -> AppResult<SnapshotFile> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::cache_io(path, e))?;
    debug!("读取快照 {} ({} 字节)", path.display(), bytes.len());
    deserialize_snapshots(&bytes)
}
