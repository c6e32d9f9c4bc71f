//! HTTP JSON 排名表数据源
//!
//! 每次请求依次经过：并发预算 → 礼貌延迟 → （配置了的话）429 退避限流器。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{AppError, AppResult, SourceError};
use crate::services::json_file_source::{parse_rating_lists, push_rating_lists};
use crate::services::source::{
    parse_params, DataReceiver, HeadingSource, SourceContext, SourceDescriptor,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HttpJsonParams {
    url: String,
}

/// 通过 HTTP 拉取标准化排名表
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    url: String,
}

impl HttpJsonSource {
    pub const KIND: &'static str = "http_json";

    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_params(params: JsonValue) -> AppResult<Arc<dyn HeadingSource>> {
        let params: HttpJsonParams = parse_params(Self::KIND, params)?;
        Ok(Arc::new(Self::new(params.url)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 发出请求并读取响应体，整个过程持有并发预算
    async fn fetch(&self, ctx: &SourceContext) -> AppResult<String> {
        let code = ctx.institution_code.as_str();
        let _permit = ctx.throttle.budget.acquire(&ctx.cancel, code).await?;
        ctx.throttle
            .politeness
            .wait_before_request(code, &ctx.cancel)
            .await?;

        debug!("[机构 {}] GET {}", code, self.url);
        let response = match ctx.throttle.limiter(code) {
            Some(limiter) => {
                limiter
                    .execute(&ctx.cancel, || ctx.http.get(&self.url).send())
                    .await?
            }
            None => tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AppError::Cancelled),
                result = ctx.http.get(&self.url).send() => {
                    result.map_err(|e| AppError::request_failed(&self.url, e))?
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::BadStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AppError::Cancelled),
            body = response.text() => body.map_err(|e| AppError::request_failed(&self.url, e)),
        }
    }
}

#[async_trait]
impl HeadingSource for HttpJsonSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor::new(
            Self::KIND,
            &HttpJsonParams {
                url: self.url.clone(),
            },
        )
    }

    async fn load_to(&self, receiver: &dyn DataReceiver, ctx: &SourceContext) -> AppResult<()> {
        let body = self.fetch(ctx).await?;
        let lists = parse_rating_lists(&self.url, &body)?;
        push_rating_lists(&ctx.institution_code, lists, receiver).await;
        Ok(())
    }
}
