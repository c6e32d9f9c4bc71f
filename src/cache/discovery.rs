//! 按有效期查找最新的快照文件

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// 找到的快照文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSnapshot {
    pub path: PathBuf,
    pub captured_at: i64,
}

/// 在缓存目录中查找仍在有效期内的最新快照
///
/// # 参数
/// - `ttl_minutes`: 有效期（分钟），-1 表示禁用缓存
/// - `now`: 当前 Unix 时间（秒）
///
/// # 返回
/// 目录不存在或没有有效快照时返回 `None`；目录存在但无法读取时返回错误
pub async fn discover_latest_snapshot(
    dir: &Path,
    ttl_minutes: i64,
    now: i64,
) -> AppResult<Option<DiscoveredSnapshot>> {
    if ttl_minutes < 0 {
        debug!("缓存已禁用，跳过快照查找");
        return Ok(None);
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("缓存目录 {} 不存在", dir.display());
            return Ok(None);
        }
        Err(e) => return Err(AppError::cache_dir_unavailable(dir, e)),
    };

    let pattern =
        Regex::new(r"^(\d+)\.snapshot$").map_err(|e| AppError::Other(e.to_string()))?;
    let ttl_secs = ttl_minutes.saturating_mul(60);
    let mut best: Option<DiscoveredSnapshot> = None;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::cache_dir_unavailable(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(captured_at) = pattern
            .captures(name)
            .and_then(|c| c[1].parse::<i64>().ok())
        else {
            continue;
        };

        if now - captured_at >= ttl_secs {
            debug!("快照 {} 已过期", name);
            continue;
        }
        if best.as_ref().map_or(true, |b| captured_at > b.captured_at) {
            best = Some(DiscoveredSnapshot {
                path: entry.path(),
                captured_at,
            });
        }
    }

    if let Some(found) = &best {
        info!(
            "📦 找到有效快照: {} ({} 秒前)",
            found.path.display(),
            now - found.captured_at
        );
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn touch(dir: &Path, name: &str) {
        tokio::fs::write(dir.join(name), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_picks_newest_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let now = 10_000;
        touch(dir.path(), "9000.snapshot").await;
        touch(dir.path(), "9500.snapshot").await;
        // 过期（ttl 20 分钟 = 1200 秒）
        touch(dir.path(), "8000.snapshot").await;
        touch(dir.path(), "notes.txt").await;
        touch(dir.path(), "9900.snapshot.tmp").await;
        touch(dir.path(), "abc.snapshot").await;

        let found = discover_latest_snapshot(dir.path(), 20, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.captured_at, 9500);
        assert_eq!(found.path, dir.path().join("9500.snapshot"));
    }

    #[tokio::test]
    async fn test_ttl_boundary_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "400.snapshot").await;
        let found = discover_latest_snapshot(dir.path(), 1, 460).await.unwrap();
        assert!(found.is_none());
        let found = discover_latest_snapshot(dir.path(), 1, 459).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_disabled_and_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "100.snapshot").await;
        assert!(discover_latest_snapshot(dir.path(), -1, 100)
            .await
            .unwrap()
            .is_none());

        let missing = dir.path().join("nope");
        assert!(discover_latest_snapshot(&missing, 60, 100)
            .await
            .unwrap()
            .is_none());
    }
}
