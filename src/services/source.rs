//! 数据源能力 - 业务能力层
//!
//! 定义「数据源」和「数据接收端」两个能力，以及按类型标签重建数据源的注册表。
//! 具体站点的解析器都实现 [`HeadingSource`]，不关心自己被并发还是串行调用。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult, SourceError};
use crate::infrastructure::Throttle;
use crate::models::{ApplicationData, HeadingData};
use crate::services::{HttpJsonSource, JsonFileSource};

/// 数据接收端
///
/// 只管接收，不返回结果；背压由有界队列提供。
#[async_trait]
pub trait DataReceiver: Send + Sync {
    async fn put_heading_data(&self, heading: HeadingData);
    async fn put_application_data(&self, application: ApplicationData);
}

/// 数据源
///
/// 实现必须可安全重试：部分失败后重跑可能重复推送已推送过的记录。
#[async_trait]
pub trait HeadingSource: Send + Sync {
    /// 稳定的类型标签 + 参数，用于序列化
    fn descriptor(&self) -> SourceDescriptor;

    /// 从上游拉取数据并推送到接收端
    async fn load_to(&self, receiver: &dyn DataReceiver, ctx: &SourceContext) -> AppResult<()>;
}

/// 数据源的可序列化描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// 类型标签（例如 `json_file`）
    pub kind: String,
    /// JSON 编码的参数
    pub params: String,
}

impl SourceDescriptor {
    pub fn new<P: Serialize>(kind: &str, params: &P) -> Self {
        Self {
            kind: kind.to_string(),
            // 参数都是普通结构体，序列化不会失败
            params: serde_json::to_string(params).unwrap_or_else(|_| "null".to_string()),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.params)
    }
}

/// 单次加载时提供给数据源的上下文
#[derive(Clone)]
pub struct SourceContext {
    /// 当前机构代码
    pub institution_code: String,
    /// 共享的限流服务
    pub throttle: Arc<Throttle>,
    /// 共享的 HTTP 客户端
    pub http: reqwest::Client,
    /// 取消信号，只覆盖本次抓取
    pub cancel: CancellationToken,
}

impl SourceContext {
    pub fn new(
        institution_code: impl Into<String>,
        throttle: Arc<Throttle>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            institution_code: institution_code.into(),
            throttle,
            http,
            cancel: CancellationToken::new(),
        }
    }
}

type SourceBuilder = Arc<dyn Fn(JsonValue) -> AppResult<Arc<dyn HeadingSource>> + Send + Sync>;

/// 数据源注册表
///
/// 每种数据源以稳定的字符串标签注册，解码时按名字而不是注册顺序查找。
#[derive(Clone, Default)]
pub struct SourceRegistry {
    builders: HashMap<String, SourceBuilder>,
}

impl SourceRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 预注册内置数据源的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(JsonFileSource::KIND, JsonFileSource::from_params);
        registry.register(HttpJsonSource::KIND, HttpJsonSource::from_params);
        registry
    }

    pub fn register<F>(&mut self, kind: &str, builder: F)
    where
        F: Fn(JsonValue) -> AppResult<Arc<dyn HeadingSource>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.to_string(), Arc::new(builder));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// 按描述重建数据源
    pub fn build(&self, descriptor: &SourceDescriptor) -> AppResult<Arc<dyn HeadingSource>> {
        let builder = self.builders.get(&descriptor.kind).ok_or_else(|| {
            AppError::from(SourceError::UnknownKind {
                kind: descriptor.kind.clone(),
            })
        })?;
        let params: JsonValue = serde_json::from_str(&descriptor.params).map_err(|source| {
            SourceError::InvalidParams {
                kind: descriptor.kind.clone(),
                source,
            }
        })?;
        builder(params)
    }
}

/// 把 JSON 参数反序列化为具体数据源的参数结构
pub(crate) fn parse_params<P>(kind: &str, params: JsonValue) -> AppResult<P>
where
    P: serde::de::DeserializeOwned,
{
    serde_json::from_value(params).map_err(|source| {
        SourceError::InvalidParams {
            kind: kind.to_string(),
            source,
        }
        .into()
    })
}
