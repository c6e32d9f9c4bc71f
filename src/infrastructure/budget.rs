//! 并发预算 - 基础设施层
//!
//! 一个全局信号量 + 可选的机构信号量。所有对外请求都必须先拿到预算。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 已获得的预算，drop 时按「全局 → 机构」顺序归还
#[derive(Debug)]
pub struct BudgetPermit {
    global: OwnedSemaphorePermit,
    local: Option<OwnedSemaphorePermit>,
}

impl Drop for BudgetPermit {
    fn drop(&mut self) {
        debug!(
            "归还并发预算 (全局 1, 机构 {})",
            usize::from(self.local.is_some())
        );
    }
}

impl BudgetPermit {
    /// 是否同时持有机构级预算
    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn global_permits(&self) -> usize {
        self.global.num_permits()
    }
}

/// 并发预算
pub struct ConcurrencyBudget {
    global: Arc<Semaphore>,
    global_limit: usize,
    per_institution: HashMap<String, (Arc<Semaphore>, usize)>,
}

impl ConcurrencyBudget {
    pub fn new(global_limit: usize, institution_limits: &HashMap<String, usize>) -> Self {
        let per_institution = institution_limits
            .iter()
            .filter(|(_, limit)| **limit > 0)
            .map(|(code, limit)| (code.clone(), (Arc::new(Semaphore::new(*limit)), *limit)))
            .collect();
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            global_limit,
            per_institution,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.global_http_max_concurrent, &config.institution_limits)
    }

    pub fn global_limit(&self) -> usize {
        self.global_limit
    }

    pub fn institution_limit(&self, code: &str) -> Option<usize> {
        self.per_institution.get(code).map(|(_, limit)| *limit)
    }

    /// 当前可用的全局预算
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// 获取一次请求的预算
    ///
    /// 先获取机构预算，再获取全局预算；全局获取失败时先释放已拿到的机构预算。
    ///
    /// # 返回
    /// 被取消时返回 [`AppError::Cancelled`]，此时不持有任何预算
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        institution_code: &str,
    ) -> AppResult<BudgetPermit> {
        let local = match self.per_institution.get(institution_code) {
            Some((sem, _)) => match acquire_cancellable(sem.clone(), cancel).await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    error!("[机构 {}] 获取机构并发预算失败: {}", institution_code, e);
                    return Err(e);
                }
            },
            None => None,
        };

        match acquire_cancellable(self.global.clone(), cancel).await {
            Ok(global) => Ok(BudgetPermit { global, local }),
            Err(e) => {
                error!("[机构 {}] 获取全局并发预算失败: {}", institution_code, e);
                drop(local);
                Err(e)
            }
        }
    }
}

async fn acquire_cancellable(
    semaphore: Arc<Semaphore>,
    cancel: &CancellationToken,
) -> AppResult<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        permit = semaphore.acquire_owned() => Ok(permit?),
    }
}
