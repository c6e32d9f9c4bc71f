//! 429 退避限流器
//!
//! 给特别脆弱的机构使用：收到 429 时按固定序列逐级延长暂停窗口，
//! 成功响应后清零。它直接包住「请求 → 响应」这一轮，
//! 429 和 5xx 都在这里无限重试，直到成功或被取消。

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// 能给出 HTTP 状态码的响应
pub trait StatusResponse {
    fn status_code(&self) -> u16;
}

impl StatusResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

#[derive(Debug)]
struct BackoffState {
    paused_until: Option<Instant>,
    level: usize,
}

/// 退避限流器
#[derive(Debug)]
pub struct BackoffLimiter {
    code: String,
    schedule: Vec<Duration>,
    state: Mutex<BackoffState>,
}

impl BackoffLimiter {
    pub fn new(code: impl Into<String>, schedule: Vec<Duration>) -> Self {
        Self {
            code: code.into(),
            schedule,
            state: Mutex::new(BackoffState {
                paused_until: None,
                level: 0,
            }),
        }
    }

    pub fn level(&self) -> usize {
        self.lock().level
    }

    pub fn paused_until(&self) -> Option<Instant> {
        self.lock().paused_until
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        // 锁内只有赋值操作，中毒后状态依然有效
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 等待当前暂停窗口结束
    ///
    /// 等待期间窗口可能被其他请求的 429 延长，醒来后重新检查。
    pub async fn wait(&self, cancel: &CancellationToken) -> AppResult<()> {
        loop {
            let Some(until) = self.paused_until() else {
                return Ok(());
            };
            let now = Instant::now();
            if until <= now {
                return Ok(());
            }
            debug!("[机构 {}] 退避暂停中，还需等待 {:?}", self.code, until - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep_until(until) => {}
            }
        }
    }

    /// 记录一次 429：只在能延长暂停窗口时更新，并提升退避级别
    pub fn handle_429(&self) {
        if self.schedule.is_empty() {
            return;
        }
        let mut state = self.lock();
        let pause = self.schedule[state.level % self.schedule.len()];
        let candidate = Instant::now() + pause;
        if state.paused_until.map_or(true, |current| candidate > current) {
            state.paused_until = Some(candidate);
        }
        state.level += 1;
        warn!(
            "⚠️ [机构 {}] 收到 429，暂停 {:?} (级别 {})",
            self.code, pause, state.level
        );
    }

    /// 成功响应后清零
    pub fn reset(&self) {
        let mut state = self.lock();
        state.level = 0;
        state.paused_until = None;
    }

    /// 执行一轮请求，直到拿到非 429、非 5xx 的响应
    ///
    /// # 参数
    /// - `request`: 每次调用发出一次新的请求
    ///
    /// # 返回
    /// 最终响应；仅在取消时返回错误
    pub async fn execute<R, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut request: F,
    ) -> AppResult<R>
    where
        R: StatusResponse,
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.wait(cancel).await?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                outcome = request() => outcome,
            };

            match outcome {
                Err(e) => {
                    warn!(
                        "⚠️ [机构 {}] 请求失败 (第 {} 次): {}",
                        self.code, attempt, e
                    );
                    self.pause(cancel, attempt).await?;
                }
                Ok(response) if response.status_code() == 429 => {
                    self.handle_429();
                }
                Ok(response) if response.status_code() >= 500 => {
                    warn!(
                        "⚠️ [机构 {}] 上游返回 {} (第 {} 次)",
                        self.code,
                        response.status_code(),
                        attempt
                    );
                    self.pause(cancel, attempt).await?;
                }
                Ok(response) => {
                    self.reset();
                    return Ok(response);
                }
            }
        }
    }

    /// 线性等待 attempt 秒
    async fn pause(&self, cancel: &CancellationToken, attempt: u64) -> AppResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(attempt)) => Ok(()),
        }
    }
}
