//! 礼貌延迟协调器
//!
//! 每个启用的机构维护一个请求计数。批内相邻请求间施加 micro 延迟，
//! 每满一批施加一次 main 延迟。锁在等待期间保持持有，
//! 因此同一机构的请求在这里被串行放行。

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, PolitenessProfile};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchState {
    /// 当前批内已放行的请求数
    pub count: usize,
    /// 是否尚未放行过任何请求
    pub first: bool,
}

impl Default for BatchState {
    fn default() -> Self {
        Self {
            count: 0,
            first: true,
        }
    }
}

struct InstitutionPoliteness {
    profile: PolitenessProfile,
    state: Mutex<BatchState>,
}

/// 礼貌延迟协调器
pub struct PolitenessCoordinator {
    institutions: HashMap<String, InstitutionPoliteness>,
}

impl PolitenessCoordinator {
    /// 只为启用的配置创建状态，其余机构直接放行
    pub fn new(profiles: &HashMap<String, PolitenessProfile>) -> Self {
        let institutions = profiles
            .iter()
            .filter(|(_, p)| p.enabled && p.batch_size > 0)
            .map(|(code, profile)| {
                (
                    code.clone(),
                    InstitutionPoliteness {
                        profile: profile.clone(),
                        state: Mutex::new(BatchState::default()),
                    },
                )
            })
            .collect();
        Self { institutions }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.politeness)
    }

    pub fn is_enabled(&self, code: &str) -> bool {
        self.institutions.contains_key(code)
    }

    /// 在发出请求前调用
    ///
    /// # 参数
    /// - `cancel`: 取消信号，等待期间被取消时立即返回
    ///
    /// # 返回
    /// 取消时返回 [`AppError::Cancelled`]
    pub async fn wait_before_request(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let Some(entry) = self.institutions.get(code) else {
            return Ok(());
        };

        let lock_started = Instant::now();
        let mut state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = entry.state.lock() => guard,
        };
        let overhead = lock_started.elapsed();

        let profile = &entry.profile;
        let delay = if state.count >= profile.batch_size {
            state.count = 0;
            let delay = jittered(
                profile.main_delay,
                profile.main_ratio_low,
                profile.main_ratio_high,
            );
            debug!("[机构 {}] 批次结束，main 延迟 {:?}", code, delay);
            delay
        } else if !state.first {
            jittered(
                profile.micro_delay,
                profile.micro_ratio_low,
                profile.micro_ratio_high,
            )
        } else {
            Duration::ZERO
        };
        state.count += 1;
        state.first = false;

        // 抢锁耗时计入延迟
        if delay > overhead {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay - overhead) => {}
            }
        }
        Ok(())
    }

    /// 重置某个机构的批次状态
    pub async fn reset_batch(&self, code: &str) {
        if let Some(entry) = self.institutions.get(code) {
            *entry.state.lock().await = BatchState::default();
        }
    }

    pub async fn state(&self, code: &str) -> Option<BatchState> {
        match self.institutions.get(code) {
            Some(entry) => Some(*entry.state.lock().await),
            None => None,
        }
    }
}

/// 在 `[low, high)` 区间内随机缩放基础延迟；区间为空时原样返回
fn jittered(base: Duration, low: f64, high: f64) -> Duration {
    if low >= high {
        return base;
    }
    let ratio = rand::thread_rng().gen_range(low..high);
    base.mul_f64(ratio)
}
