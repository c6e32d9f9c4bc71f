//! 机构运行时聚合：定义 + 计算器 + 快照缓存

use std::sync::Arc;

use crate::cache::{InstitutionSnapshot, SnapshotCache};
use crate::models::InstitutionDefinition;
use crate::services::{Calculator, CalculatorFactory};
use crate::workflow::source_loader;

/// 一个机构在一批加载中的全部状态
///
/// 生命周期：创建（空）→ `prepare` 挂上新的计算器 → 抓取或回放填充 →
/// 跨机构协调 → 丢弃或写入快照。加载期间计算器和缓存由本机构独占。
pub struct Institution {
    definition: Arc<InstitutionDefinition>,
    calculator: Option<Box<dyn Calculator>>,
    cache: SnapshotCache,
}

impl Institution {
    pub fn new(definition: Arc<InstitutionDefinition>) -> Self {
        Self {
            definition,
            calculator: None,
            cache: SnapshotCache::new(),
        }
    }

    /// 带着已有缓存创建（用于回放）
    pub fn with_cache(definition: Arc<InstitutionDefinition>, cache: SnapshotCache) -> Self {
        Self {
            definition,
            calculator: None,
            cache,
        }
    }

    /// 挂上一个全新的计算器
    pub fn prepare(&mut self, factory: &CalculatorFactory) {
        self.calculator = Some(factory(&self.definition));
    }

    pub fn code(&self) -> &str {
        &self.definition.code
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<InstitutionDefinition> {
        &self.definition
    }

    pub fn calculator(&self) -> Option<&dyn Calculator> {
        self.calculator.as_deref()
    }

    pub fn calculator_mut(&mut self) -> Option<&mut (dyn Calculator + 'static)> {
        self.calculator.as_deref_mut()
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut SnapshotCache {
        &mut self.cache
    }

    /// 加载成功过（有计算器）
    pub fn is_prepared(&self) -> bool {
        self.calculator.is_some()
    }

    /// 缓存中有数据
    pub fn has_data(&self) -> bool {
        !self.cache.is_empty()
    }

    pub fn set_original_submitted(&mut self, student_id: &str) {
        if let Some(calc) = self.calculator.as_deref_mut() {
            calc.set_original_submitted(student_id);
        }
    }

    pub fn set_quit(&mut self, student_id: &str) {
        if let Some(calc) = self.calculator.as_deref_mut() {
            calc.set_quit(student_id);
        }
    }

    pub fn to_snapshot(&self) -> InstitutionSnapshot {
        InstitutionSnapshot::new(self.definition.to_record(), &self.cache)
    }

    /// 基于同一份缓存得到一个独立的机构
    ///
    /// 新计算器由缓存回放得到，再复制本机构的「退出」和「已交原件」两组标记。
    ///
    /// # 返回
    /// 本机构从未加载过时返回 `None`
    pub fn replay_clone(&self, factory: &CalculatorFactory) -> Option<Institution> {
        let source = self.calculator.as_deref()?;
        let mut clone = Institution::with_cache(self.definition.clone(), self.cache.clone());
        source_loader::replay(&mut clone, factory);

        if let Some(target) = clone.calculator.as_deref_mut() {
            source.for_each_quit(&mut |id| target.set_quit(id));
            source.for_each_original_submitted(&mut |id| target.set_original_submitted(id));
        }
        Some(clone)
    }
}

impl std::fmt::Debug for Institution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Institution")
            .field("code", &self.definition.code)
            .field("prepared", &self.calculator.is_some())
            .field("headings", &self.cache.headings().len())
            .field("applications", &self.cache.applications().len())
            .finish()
    }
}
