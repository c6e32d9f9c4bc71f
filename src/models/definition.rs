//! 机构静态定义

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::source::{HeadingSource, SourceDescriptor, SourceRegistry};

/// 机构定义（构建后不可变）
#[derive(Clone)]
pub struct InstitutionDefinition {
    /// 机构代码（唯一键）
    pub code: String,
    /// 显示名称
    pub name: String,
    /// 为 true 时按定义顺序逐个加载数据源，不并发
    pub sequential: bool,
    pub sources: Vec<Arc<dyn HeadingSource>>,
}

impl InstitutionDefinition {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        sources: Vec<Arc<dyn HeadingSource>>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            sequential: false,
            sources,
        }
    }

    /// 标记为需要严格串行加载
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }

    /// 转换为可序列化的记录
    pub fn to_record(&self) -> DefinitionRecord {
        DefinitionRecord {
            code: self.code.clone(),
            name: self.name.clone(),
            sequential: self.sequential,
            sources: self.sources.iter().map(|s| s.descriptor()).collect(),
        }
    }
}

impl fmt::Debug for InstitutionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstitutionDefinition")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("sequential", &self.sequential)
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|s| s.descriptor().kind)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// 机构定义的可序列化形式，数据源以「类型标签 + 参数」保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub code: String,
    pub name: String,
    pub sequential: bool,
    pub sources: Vec<SourceDescriptor>,
}

impl DefinitionRecord {
    /// 通过注册表重建数据源，得到可直接加载的定义
    pub fn into_definition(self, registry: &SourceRegistry) -> AppResult<InstitutionDefinition> {
        let sources = self
            .sources
            .iter()
            .map(|descriptor| registry.build(descriptor))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(InstitutionDefinition {
            code: self.code,
            name: self.name,
            sequential: self.sequential,
            sources,
        })
    }
}
