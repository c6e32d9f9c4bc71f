//! 跨机构协调 - 编排层
//!
//! 同一批机构以有限并发加载，每个机构完成时把「已交原件」的考生登记到共享台账
//! （先登记者胜出）。全部完成后统一标记：登记机构标记已交原件，其余机构标记退出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::workflow::{load_from_sources, replay, Institution, LoadContext};

/// 机构的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// 从数据源新鲜抓取
    Fresh,
    /// 从快照缓存回放
    Replay,
}

/// 考生 → 首个登记其原件的机构代码
pub type OriginalLedger = HashMap<String, String>;

/// 一个分区加载协调后的结果
#[derive(Debug)]
pub struct PartitionResult {
    /// 与输入顺序一致
    pub institutions: Vec<Institution>,
    pub ledger: OriginalLedger,
    /// 在其他机构已登记过原件的重复上报次数
    pub conflicts: usize,
}

/// 加载一个分区并在分区内协调
pub async fn load_partition(
    institutions: Vec<Institution>,
    mode: LoadMode,
    ctx: &LoadContext,
) -> PartitionResult {
    if institutions.is_empty() {
        return PartitionResult {
            institutions,
            ledger: OriginalLedger::new(),
            conflicts: 0,
        };
    }

    let semaphore = Arc::new(Semaphore::new(ctx.max_concurrent_institutions));
    let ledger: Arc<Mutex<OriginalLedger>> = Arc::new(Mutex::new(OriginalLedger::new()));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let definitions: Vec<_> = institutions.iter().map(|i| i.definition().clone()).collect();

    let mut handles = Vec::new();
    for mut institution in institutions {
        let semaphore = semaphore.clone();
        let ledger = ledger.clone();
        let conflicts = conflicts.clone();
        let ctx = ctx.clone();

        let handle = tokio::spawn(async move {
            // 信号量只在本函数内持有，不会被关闭
            let _permit = semaphore.acquire_owned().await.ok();
            let originals = match mode {
                LoadMode::Fresh => load_from_sources(&mut institution, &ctx).await,
                LoadMode::Replay => replay(&mut institution, &ctx.calculator_factory),
            };
            let found = record_originals(&ledger, institution.code(), originals);
            conflicts.fetch_add(found, Ordering::Relaxed);
            institution
        });
        handles.push(handle);
    }

    // 屏障：等待全部机构完成
    let mut loaded = Vec::with_capacity(handles.len());
    for (definition, handle) in definitions.into_iter().zip(handles) {
        match handle.await {
            Ok(institution) => loaded.push(institution),
            Err(e) => {
                error!("[机构 {}] 加载任务异常，跳过标记: {}", definition.code, e);
                loaded.push(Institution::new(definition));
            }
        }
    }

    let ledger = match Arc::try_unwrap(ledger) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|e| e.into_inner()),
        Err(shared) => lock(&shared).clone(),
    };
    mark_partition(&mut loaded, &ledger);

    let conflicts = conflicts.load(Ordering::Relaxed);
    if conflicts > 0 {
        info!("分区内共 {} 次重复的原件登记", conflicts);
    }
    PartitionResult {
        institutions: loaded,
        ledger,
        conflicts,
    }
}

fn lock(ledger: &Mutex<OriginalLedger>) -> std::sync::MutexGuard<'_, OriginalLedger> {
    ledger.lock().unwrap_or_else(|e| e.into_inner())
}

/// 登记一个机构的已交原件考生，已登记在其他机构的记为冲突
///
/// # 返回
/// 冲突次数
fn record_originals(
    ledger: &Mutex<OriginalLedger>,
    code: &str,
    originals: impl IntoIterator<Item = String>,
) -> usize {
    let mut ledger = lock(ledger);
    let mut conflicts = 0;
    for student_id in originals {
        match ledger.get(&student_id) {
            Some(first) if first != code => {
                log_conflict(&student_id, first, code);
                conflicts += 1;
            }
            Some(_) => {}
            None => {
                ledger.insert(student_id, code.to_string());
            }
        }
    }
    conflicts
}

/// 按台账标记：登记机构 → 已交原件，其余机构 → 退出
///
/// 没有计算器的机构（加载异常）被跳过。
pub fn mark_partition(institutions: &mut [Institution], ledger: &OriginalLedger) {
    for (student_id, code) in ledger {
        for institution in institutions.iter_mut() {
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
    debug!(
        "分区标记完成: {} 名考生, {} 个机构",
        ledger.len(),
        institutions.len()
    );
}

// ========== 日志辅助函数 ==========

fn log_conflict(student_id: &str, first: &str, second: &str) {
    info!(
        "ℹ️ 考生 {} 在多个机构提交了原件: 先登记 {}, 又出现在 {}, 保留 {}",
        student_id, first, second, first
    );
}
