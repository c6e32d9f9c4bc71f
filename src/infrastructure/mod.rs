//! 基础设施层
//!
//! 进程级共享的限流服务：并发预算、礼貌延迟、429 退避、重试策略。
//! 都是显式构造后通过 `Arc` 注入，测试中每个用例各自持有独立实例。

pub mod backoff;
pub mod budget;
pub mod politeness;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;

pub use backoff::{BackoffLimiter, StatusResponse};
pub use budget::{BudgetPermit, ConcurrencyBudget};
pub use politeness::{BatchState, PolitenessCoordinator};
pub use retry::{retry, RetryPolicy};

use crate::config::Config;

/// 所有对外请求共享的限流服务
pub struct Throttle {
    pub budget: ConcurrencyBudget,
    pub politeness: PolitenessCoordinator,
    limiters: HashMap<String, Arc<BackoffLimiter>>,
}

impl Throttle {
    pub fn new(
        budget: ConcurrencyBudget,
        politeness: PolitenessCoordinator,
        limiters: HashMap<String, Arc<BackoffLimiter>>,
    ) -> Self {
        Self {
            budget,
            politeness,
            limiters,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let limiters = config
            .backoff_institutions
            .iter()
            .map(|code| {
                (
                    code.clone(),
                    Arc::new(BackoffLimiter::new(code.clone(), config.backoff_schedule.clone())),
                )
            })
            .collect();
        Self::new(
            ConcurrencyBudget::from_config(config),
            PolitenessCoordinator::from_config(config),
            limiters,
        )
    }

    /// 不做任何限制（测试用）
    pub fn unlimited() -> Self {
        Self::new(
            ConcurrencyBudget::new(usize::MAX >> 4, &HashMap::new()),
            PolitenessCoordinator::new(&HashMap::new()),
            HashMap::new(),
        )
    }

    /// 机构专用的退避限流器（只有配置过的机构才有）
    pub fn limiter(&self, code: &str) -> Option<Arc<BackoffLimiter>> {
        self.limiters.get(code).cloned()
    }
}
