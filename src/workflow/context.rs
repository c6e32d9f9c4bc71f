//! 一次加载共享的上下文

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{RetryPolicy, Throttle};
use crate::services::{default_calculator_factory, CalculatorFactory};

/// 加载上下文
///
/// 所有字段都可以廉价克隆，每个机构任务持有一份。
#[derive(Clone)]
pub struct LoadContext {
    pub throttle: Arc<Throttle>,
    pub http: reqwest::Client,
    pub retry: RetryPolicy,
    /// 数据源 → 消费者队列容量
    pub channel_capacity: usize,
    /// 同时加载的机构数量
    pub max_concurrent_institutions: usize,
    pub calculator_factory: CalculatorFactory,
    /// 根取消信号，每个数据源拿到的是它的子信号
    pub cancel: CancellationToken,
}

impl LoadContext {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            throttle: Arc::new(Throttle::from_config(config)),
            http,
            retry: RetryPolicy::from_config(config),
            channel_capacity: config.channel_capacity.max(1),
            max_concurrent_institutions: config.max_concurrent_institutions.max(1),
            calculator_factory: default_calculator_factory(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_calculator_factory(mut self, factory: CalculatorFactory) -> Self {
        self.calculator_factory = factory;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }
}
