//! 批量加载 - 编排层
//!
//! ## 职责
//!
//! 1. **全部新鲜加载**：所有机构从数据源抓取，一个分区内协调
//! 2. **部分缓存加载**：命中快照的机构回放，其余机构抓取，两个分区各自协调后再做一次跨分区协调
//!
//! 跨分区时新鲜数据优先：新鲜分区中登记过的考生，在所有缓存机构中一律标记退出。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::SnapshotCache;
use crate::models::InstitutionDefinition;
use crate::orchestrator::reconcile::{load_partition, LoadMode, OriginalLedger};
use crate::workflow::{Institution, LoadContext};

/// 所有机构都从数据源新鲜加载
pub async fn load_from_definitions(
    definitions: &[Arc<InstitutionDefinition>],
    ctx: &LoadContext,
) -> Vec<Institution> {
    log_batch_start(definitions.len(), 0);
    let institutions = definitions
        .iter()
        .map(|def| Institution::new(def.clone()))
        .collect();
    let result = load_partition(institutions, LoadMode::Fresh, ctx).await;
    log_batch_complete(&result.institutions, result.ledger.len());
    result.institutions
}

/// 有缓存的机构回放，其余机构新鲜加载
///
/// # 参数
/// - `caches`: 机构代码 → 缓存记录；不在 `definitions` 中的缓存被忽略
///
/// # 返回
/// (缓存机构在前、新鲜机构在后的列表, 是否全部来自缓存)
pub async fn load_with_caches(
    definitions: &[Arc<InstitutionDefinition>],
    mut caches: HashMap<String, SnapshotCache>,
    ctx: &LoadContext,
) -> (Vec<Institution>, bool) {
    let mut cached = Vec::new();
    let mut fresh = Vec::new();
    for def in definitions {
        match caches.remove(&def.code) {
            Some(cache) => cached.push(Institution::with_cache(def.clone(), cache)),
            None => fresh.push(Institution::new(def.clone())),
        }
    }
    let cache_complete = fresh.is_empty();
    log_batch_start(fresh.len(), cached.len());

    let cached = load_partition(cached, LoadMode::Replay, ctx).await;
    let fresh = load_partition(fresh, LoadMode::Fresh, ctx).await;

    let mut cached_institutions = cached.institutions;
    let mut fresh_institutions = fresh.institutions;
    reconcile_partitions(
        &mut cached_institutions,
        &cached.ledger,
        &mut fresh_institutions,
        &fresh.ledger,
    );

    let mut all = cached_institutions;
    all.extend(fresh_institutions);
    log_batch_complete(&all, cached.ledger.len() + fresh.ledger.len());
    (all, cache_complete)
}

/// 跨分区协调，新鲜分区的结果优先
pub fn reconcile_partitions(
    cached: &mut [Institution],
    cached_ledger: &OriginalLedger,
    fresh: &mut [Institution],
    fresh_ledger: &OriginalLedger,
) {
    let mut removed_from_cached = HashSet::new();

    for student_id in fresh_ledger.keys() {
        for institution in cached.iter_mut() {
            if !institution.is_prepared() {
                continue;
            }
            institution.set_quit(student_id);
            removed_from_cached.insert(student_id.as_str());
        }
    }

    for (student_id, code) in cached_ledger {
        if removed_from_cached.contains(student_id.as_str()) {
            debug!("考生 {} 在缓存和新鲜数据中都提交了原件，以新鲜数据为准", student_id);
            continue;
        }
        for institution in fresh.iter_mut() {
            if !institution.is_prepared() {
                continue;
            }
            if institution.code() == code {
                institution.set_original_submitted(student_id);
            } else {
                institution.set_quit(student_id);
            }
        }
    }
}

// ========== 日志辅助函数 ==========

fn log_batch_start(fresh: usize, cached: usize) {
    info!("{}", "=".repeat(60));
    info!("📦 开始加载: {} 个机构抓取, {} 个机构从缓存回放", fresh, cached);
    info!("{}", "=".repeat(60));
}

fn log_batch_complete(institutions: &[Institution], students: usize) {
    let failed = institutions.iter().filter(|i| !i.is_prepared()).count();
    info!("{}", "─".repeat(60));
    info!(
        "✓ 加载完成: {} 个机构 (异常 {}), {} 名考生登记了原件",
        institutions.len(),
        failed,
        students
    );
    info!("{}", "─".repeat(60));
}
