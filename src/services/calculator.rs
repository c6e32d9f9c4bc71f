//! 录取模拟计算器能力
//!
//! 计算器本身属于下游模拟引擎，这里只定义编排层需要的能力，
//! 并提供一个内存实现 [`VarsityCalculator`] 作为缺省实现。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::models::{Capacities, Competition, InstitutionDefinition};

/// 计算器能力
///
/// 一次加载期间由所属机构独占，只有单个消费者写入。
pub trait Calculator: Send + Sync {
    fn add_heading(&mut self, code: &str, capacities: Capacities, pretty_name: &str);

    fn add_application(
        &mut self,
        heading_code: &str,
        student_id: &str,
        rating_place: u32,
        priority: u32,
        competition_type: Competition,
        scores_sum: u32,
    );

    /// 去重并排序内部申请列表
    fn normalize_applications(&mut self);

    fn set_original_submitted(&mut self, student_id: &str);

    fn set_quit(&mut self, student_id: &str);

    fn for_each_original_submitted(&self, f: &mut dyn FnMut(&str));

    fn for_each_quit(&self, f: &mut dyn FnMut(&str));

    fn heading_count(&self) -> usize;

    fn application_count(&self) -> usize;
}

/// 计算器工厂，每次调用返回一个全新的实例
pub type CalculatorFactory =
    Arc<dyn Fn(&InstitutionDefinition) -> Box<dyn Calculator> + Send + Sync>;

/// 缺省工厂：内存计算器
pub fn default_calculator_factory() -> CalculatorFactory {
    Arc::new(|def: &InstitutionDefinition| {
        Box::new(VarsityCalculator::new(&def.code)) as Box<dyn Calculator>
    })
}

/// 计算器中的专业
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub code: String,
    pub capacities: Capacities,
    pub pretty_name: String,
}

/// 计算器中的申请
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Application {
    pub heading_code: String,
    pub student_id: String,
    pub priority: u32,
    pub rating_place: u32,
    pub competition_type: Competition,
    pub scores_sum: u32,
}

/// 内存计算器
///
/// 只保存编排层写入的状态。`set_quit` 会撤销同一考生在本机构的原件标记，
/// 保证一个考生最多只在一个机构处于「已提交原件」状态。
#[derive(Debug, Default)]
pub struct VarsityCalculator {
    code: String,
    headings: HashMap<String, Heading>,
    applications: Vec<Application>,
    originals: BTreeSet<String>,
    quit: BTreeSet<String>,
}

impl VarsityCalculator {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            ..Default::default()
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn heading(&self, code: &str) -> Option<&Heading> {
        self.headings.get(code)
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    pub fn is_quit(&self, student_id: &str) -> bool {
        self.quit.contains(student_id)
    }

    pub fn is_original_submitted(&self, student_id: &str) -> bool {
        self.originals.contains(student_id)
    }
}

impl Calculator for VarsityCalculator {
    fn add_heading(&mut self, code: &str, capacities: Capacities, pretty_name: &str) {
        self.headings.insert(
            code.to_string(),
            Heading {
                code: code.to_string(),
                capacities,
                pretty_name: pretty_name.to_string(),
            },
        );
    }

    fn add_application(
        &mut self,
        heading_code: &str,
        student_id: &str,
        rating_place: u32,
        priority: u32,
        competition_type: Competition,
        scores_sum: u32,
    ) {
        if !self.headings.contains_key(heading_code) {
            tracing::debug!(
                "[机构 {}] 忽略未知专业 {} 的申请 (考生 {})",
                self.code,
                heading_code,
                student_id
            );
            return;
        }
        self.applications.push(Application {
            heading_code: heading_code.to_string(),
            student_id: student_id.to_string(),
            priority,
            rating_place,
            competition_type,
            scores_sum,
        });
    }

    fn normalize_applications(&mut self) {
        self.applications.sort();
        self.applications.dedup();
    }

    fn set_original_submitted(&mut self, student_id: &str) {
        if !self.quit.contains(student_id) {
            self.originals.insert(student_id.to_string());
        }
    }

    fn set_quit(&mut self, student_id: &str) {
        self.originals.remove(student_id);
        self.quit.insert(student_id.to_string());
    }

    fn for_each_original_submitted(&self, f: &mut dyn FnMut(&str)) {
        self.originals.iter().for_each(|id| f(id));
    }

    fn for_each_quit(&self, f: &mut dyn FnMut(&str)) {
        self.quit.iter().for_each(|id| f(id));
    }

    fn heading_count(&self) -> usize {
        self.headings.len()
    }

    fn application_count(&self) -> usize {
        self.applications.len()
    }
}
