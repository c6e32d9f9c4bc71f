//! 本地 JSON 排名表数据源
//!
//! 文件内容是标准化后的排名表（单个对象或对象数组），
//! 同一格式也被 [`HttpJsonSource`](crate::services::HttpJsonSource) 复用。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, SourceError};
use crate::models::{prepare_student_id, ApplicationData, Capacities, Competition, HeadingData};
use crate::services::source::{
    parse_params, DataReceiver, HeadingSource, SourceContext, SourceDescriptor,
};

/// 一个专业的标准化排名表
#[derive(Debug, Clone, Deserialize)]
pub struct RatingList {
    pub heading: ListHeading,
    #[serde(default)]
    pub applications: Vec<ListApplication>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListHeading {
    pub name: String,
    #[serde(default)]
    pub capacities: Capacities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListApplication {
    pub student_id: String,
    #[serde(default)]
    pub scores_sum: u32,
    pub rating_place: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub competition: Competition,
    #[serde(default)]
    pub original_submitted: bool,
    #[serde(default)]
    pub disambiguation: BTreeMap<String, String>,
}

fn default_priority() -> u32 {
    1
}

/// 一个文档可以是单个排名表，也可以是排名表数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListDocument {
    Many(Vec<RatingList>),
    One(RatingList),
}

/// 解析标准化排名表文档
pub fn parse_rating_lists(what: &str, raw: &str) -> AppResult<Vec<RatingList>> {
    let document: ListDocument =
        serde_json::from_str(raw).map_err(|e| AppError::parse_failed(what, e))?;
    Ok(match document {
        ListDocument::Many(lists) => lists,
        ListDocument::One(list) => vec![list],
    })
}

/// 把排名表推送到接收端
///
/// 学号无法规范化的记录会被跳过并记录 warn，不影响同一表中的其他记录。
pub async fn push_rating_lists(
    institution_code: &str,
    lists: Vec<RatingList>,
    receiver: &dyn DataReceiver,
) {
    for list in lists {
        let heading = HeadingData::new(list.heading.name, list.heading.capacities);
        let heading_code = heading.code.clone();
        debug!(
            "[机构 {}] 专业 {} 共 {} 条申请",
            institution_code,
            heading.pretty_name,
            list.applications.len()
        );
        receiver.put_heading_data(heading).await;

        for app in list.applications {
            let student_id = match prepare_student_id(&app.student_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!("⚠️ [机构 {}] 跳过记录: {}", institution_code, e);
                    continue;
                }
            };
            receiver
                .put_application_data(ApplicationData {
                    heading_code: heading_code.clone(),
                    student_id,
                    scores_sum: app.scores_sum,
                    rating_place: app.rating_place,
                    priority: app.priority,
                    competition_type: app.competition,
                    original_submitted: app.original_submitted,
                    disambiguation: app.disambiguation,
                })
                .await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JsonFileParams {
    path: PathBuf,
}

/// 从本地 JSON 文件读取排名表
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub const KIND: &'static str = "json_file";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_params(params: JsonValue) -> AppResult<Arc<dyn HeadingSource>> {
        let params: JsonFileParams = parse_params(Self::KIND, params)?;
        Ok(Arc::new(Self::new(params.path)))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl HeadingSource for JsonFileSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor::new(
            Self::KIND,
            &JsonFileParams {
                path: self.path.clone(),
            },
        )
    }

    async fn load_to(&self, receiver: &dyn DataReceiver, ctx: &SourceContext) -> AppResult<()> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::ReadFailed {
                path: self.path.clone(),
                source,
            })?;
        let lists = parse_rating_lists(&self.path.display().to_string(), &raw)?;
        push_rating_lists(&ctx.institution_code, lists, receiver).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::Throttle;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        headings: Mutex<Vec<HeadingData>>,
        applications: Mutex<Vec<ApplicationData>>,
    }

    #[async_trait]
    impl DataReceiver for Collect {
        async fn put_heading_data(&self, heading: HeadingData) {
            self.headings.lock().await.push(heading);
        }
        async fn put_application_data(&self, application: ApplicationData) {
            self.applications.lock().await.push(application);
        }
    }

    fn ctx() -> SourceContext {
        SourceContext::new("hse", Arc::new(Throttle::unlimited()), reqwest::Client::new())
    }

    #[test]
    fn test_parse_single_and_many() {
        let one = r#"{"heading":{"name":"Физика"},"applications":[]}"#;
        assert_eq!(parse_rating_lists("one", one).unwrap().len(), 1);

        let many = r#"[{"heading":{"name":"Физика"}},{"heading":{"name":"Химия"}}]"#;
        assert_eq!(parse_rating_lists("many", many).unwrap().len(), 2);

        assert!(parse_rating_lists("bad", "{").is_err());
    }

    #[tokio::test]
    async fn test_load_pushes_normalized_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hse.json");
        tokio::fs::write(
            &path,
            r#"{
                "heading": {"name": "Физика", "capacities": {"regular": 10, "target_quota": 2, "dedicated_quota": 1, "special_quota": 1}},
                "applications": [
                    {"student_id": "123-456", "scores_sum": 280, "rating_place": 1, "priority": 2, "competition": "TargetQuota", "original_submitted": true},
                    {"student_id": "99999999999999999", "rating_place": 2},
                    {"student_id": "777", "rating_place": 3}
                ]
            }"#,
        )
        .await
        .unwrap();

        let source = JsonFileSource::new(&path);
        let sink = Collect::default();
        source.load_to(&sink, &ctx()).await.unwrap();

        let headings = sink.headings.lock().await;
        let applications = sink.applications.lock().await;
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].capacities.total(), 14);
        // 超长学号被跳过
        assert_eq!(applications.len(), 2);
        assert_eq!(applications[0].student_id, "0000000123456");
        assert_eq!(applications[0].competition_type, Competition::TargetQuota);
        assert_eq!(applications[0].heading_code, headings[0].code);
        assert_eq!(applications[1].priority, 1);
        assert!(!applications[1].original_submitted);
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let source = JsonFileSource::new("/nonexistent/list.json");
        let result = source.load_to(&Collect::default(), &ctx()).await;
        assert!(matches!(
            result,
            Err(AppError::Source(SourceError::ReadFailed { .. }))
        ));
    }
}
