//! 有界重试
//!
//! 包住一次数据源加载。失败后按尝试次数计算退避时长，超过最大次数返回最后一次的错误。
//! 取消错误永远不重试。

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, SourceError};

/// 数据源加载的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            base_delay: config.retry_base_delay,
        }
    }

    /// 第 `attempt` 次失败后的等待时长：base × 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        retry(
            operation_name,
            self.max_attempts,
            |attempt| self.backoff(attempt),
            cancel,
            operation,
        )
        .await
    }
}

/// 带退避的重试
///
/// # 参数
/// - `operation_name`: 用于日志
/// - `max_attempts`: 最大尝试次数（至少 1 次）
/// - `backoff`: 根据失败次数（从 1 开始）给出等待时长
/// - `cancel`: 取消信号，退避等待期间也会响应
///
/// # 返回
/// 操作结果，或最后一次失败的错误
pub async fn retry<T, F, Fut, B>(
    operation_name: &str,
    max_attempts: u32,
    backoff: B,
    cancel: &CancellationToken,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
    B: Fn(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        if attempt > 1 {
            debug!("🔄 {} 第 {}/{} 次尝试", operation_name, attempt, max_attempts);
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(
                "❌ {} 在 {} 次尝试后仍然失败: {}",
                operation_name, attempt, err
            );
            return Err(err);
        }

        let delay = backoff(attempt);
        warn!(
            "⚠️ {} 第 {}/{} 次失败 ({}), {:?} 后重试: {}",
            operation_name,
            attempt,
            max_attempts,
            classify(&err),
            delay,
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// 粗略的错误分类，只用于日志
fn classify(err: &AppError) -> &'static str {
    match err {
        AppError::Source(SourceError::RequestFailed { source, .. }) if source.is_timeout() => {
            "超时"
        }
        AppError::Source(SourceError::RequestFailed { .. })
        | AppError::Source(SourceError::BadStatus { .. }) => "网络",
        _ => "其他",
    }
}
