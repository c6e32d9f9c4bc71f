//! 数据源产出的标准化记录

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppResult, SourceError};

/// 学号规范化后的固定长度
const STUDENT_ID_LEN: usize = 13;

/// 竞争类型
///
/// 顺序有意义：`Bvi` 之上的都是配额类（定向、专项、特殊）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Competition {
    /// 普通竞争
    #[default]
    Regular,
    /// 免试录取（БВИ）
    Bvi,
    /// 定向配额
    TargetQuota,
    /// 专项配额
    DedicatedQuota,
    /// 特殊配额
    SpecialQuota,
}

impl Competition {
    /// 是否属于配额类
    pub fn is_quota(self) -> bool {
        self > Competition::Bvi
    }
}

/// 各竞争类型的招生名额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Capacities {
    pub regular: u32,
    pub target_quota: u32,
    pub dedicated_quota: u32,
    pub special_quota: u32,
}

impl Capacities {
    pub fn total(&self) -> u32 {
        self.regular + self.target_quota + self.dedicated_quota + self.special_quota
    }
}

/// 专业（招生方向）数据
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeadingData {
    /// 由显示名称派生的稳定代码
    pub code: String,
    pub capacities: Capacities,
    /// 显示名称
    pub pretty_name: String,
}

impl HeadingData {
    /// 按显示名称构建专业数据，代码自动派生
    pub fn new(pretty_name: impl Into<String>, capacities: Capacities) -> Self {
        let pretty_name = pretty_name.into();
        Self {
            code: heading_code(&pretty_name),
            capacities,
            pretty_name,
        }
    }
}

/// 单个考生对单个专业的申请
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationData {
    pub heading_code: String,
    pub student_id: String,
    /// 总分
    pub scores_sum: u32,
    /// 排名（越小越靠前）
    pub rating_place: u32,
    /// 志愿优先级（1 为最高）
    pub priority: u32,
    pub competition_type: Competition,
    /// 是否已在本机构提交原件
    pub original_submitted: bool,
    /// 机构特有的消歧字段
    pub disambiguation: BTreeMap<String, String>,
}

/// 生成专业代码：显示名称的 SHA-256 十六进制
pub fn heading_code(pretty_name: &str) -> String {
    let digest = Sha256::digest(pretty_name.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 规范化学号：去掉所有非数字字符，左侧补零到 13 位
///
/// # 返回
/// 超过 13 位数字时返回错误
pub fn prepare_student_id(raw: &str) -> AppResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > STUDENT_ID_LEN {
        return Err(SourceError::InvalidStudentId {
            raw: raw.to_string(),
        }
        .into());
    }
    Ok(format!("{:0>width$}", digits, width = STUDENT_ID_LEN))
}
