use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_test::{assert_err, assert_ok};

use rating_ingest::cache::{deserialize_snapshots, read_snapshot_file};
use rating_ingest::config::Config;
use rating_ingest::error::{AppError, AppResult, ConfigError};
use rating_ingest::infrastructure::RetryPolicy;
use rating_ingest::models::{
    ApplicationData, Capacities, Competition, HeadingData, InstitutionDefinition,
};
use rating_ingest::orchestrator::{
    crawl_with_options, load_from_definitions, load_partition, load_with_caches, CrawlOptions,
    LoadMode,
};
use rating_ingest::services::{
    DataReceiver, HeadingSource, SourceContext, SourceDescriptor, SourceRegistry,
};
use rating_ingest::workflow::{Institution, LoadContext};

// ========== 测试用数据源 ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryParams {
    heading: String,
}

/// 内存数据源：可配置前几次失败、推送前等待
struct MemorySource {
    heading: HeadingData,
    students: Vec<(String, Competition, bool)>,
    fail_times: usize,
    delay: Duration,
    calls: AtomicUsize,
}

impl MemorySource {
    fn new(heading: &str, students: &[(&str, Competition, bool)]) -> Self {
        Self {
            heading: HeadingData::new(heading, Capacities {
                regular: 10,
                ..Default::default()
            }),
            students: students
                .iter()
                .map(|(id, kind, original)| (id.to_string(), *kind, *original))
                .collect(),
            fail_times: 0,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, times: usize) -> Self {
        self.fail_times = times;
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadingSource for MemorySource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor::new(
            "memory",
            &MemoryParams {
                heading: self.heading.pretty_name.clone(),
            },
        )
    }

    async fn load_to(&self, receiver: &dyn DataReceiver, _ctx: &SourceContext) -> AppResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            return Err(AppError::Other(format!("上游暂时不可用 (第 {} 次)", call)));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        receiver.put_heading_data(self.heading.clone()).await;
        for (place, (id, kind, original)) in self.students.iter().enumerate() {
            receiver
                .put_application_data(ApplicationData {
                    heading_code: self.heading.code.clone(),
                    student_id: id.clone(),
                    scores_sum: 300 - place as u32,
                    rating_place: place as u32 + 1,
                    priority: 1,
                    competition_type: *kind,
                    original_submitted: *original,
                    disambiguation: BTreeMap::new(),
                })
                .await;
        }
        Ok(())
    }
}

// ========== 辅助函数 ==========

fn context() -> LoadContext {
    let mut config = Config::default();
    config.max_concurrent_institutions = 1;
    LoadContext::from_config(&config)
        .unwrap()
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        })
}

fn institution(
    code: &str,
    name: &str,
    sources: Vec<Arc<MemorySource>>,
) -> Arc<InstitutionDefinition> {
    let sources = sources
        .into_iter()
        .map(|s| s as Arc<dyn HeadingSource>)
        .collect();
    Arc::new(InstitutionDefinition::new(code, name, sources))
}

fn originals(inst: &Institution) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(calc) = inst.calculator() {
        calc.for_each_original_submitted(&mut |id| {
            set.insert(id.to_string());
        });
    }
    set
}

fn quits(inst: &Institution) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(calc) = inst.calculator() {
        calc.for_each_quit(&mut |id| {
            set.insert(id.to_string());
        });
    }
    set
}

fn find<'a>(institutions: &'a [Institution], code: &str) -> &'a Institution {
    institutions
        .iter()
        .find(|i| i.code() == code)
        .unwrap_or_else(|| panic!("缺少机构 {}", code))
}

fn crawl_options(dir: &Path, ttl: i64) -> CrawlOptions {
    CrawlOptions {
        institutions: vec!["all".to_string()],
        exclude: Vec::new(),
        cache_dir: dir.to_path_buf(),
        cache_ttl_minutes: ttl,
    }
}

const SHARED: &str = "0000000000042";

// ========== 协调 ==========

#[tokio::test]
async fn test_first_institution_keeps_original_and_second_quits() {
    let x = institution(
        "hse",
        "НИУ ВШЭ",
        vec![Arc::new(MemorySource::new(
            "Физика",
            &[(SHARED, Competition::Regular, true), ("0000000000001", Competition::Regular, false)],
        ))],
    );
    let y = institution(
        "itmo",
        "ИТМО",
        vec![Arc::new(
            MemorySource::new("Информатика", &[(SHARED, Competition::Regular, true)])
                .delayed(Duration::from_millis(20)),
        )],
    );

    let loaded = load_from_definitions(&[x, y], &context()).await;
    let hse = find(&loaded, "hse");
    let itmo = find(&loaded, "itmo");

    assert!(originals(hse).contains(SHARED));
    assert!(!quits(hse).contains(SHARED));
    assert!(quits(itmo).contains(SHARED));
    assert!(!originals(itmo).contains(SHARED));
    // 没有交原件的考生不受影响
    assert!(!quits(hse).contains("0000000000001"));
}

#[tokio::test]
async fn test_duplicate_original_in_one_pass_is_counted_as_conflict() {
    let x = institution(
        "hse",
        "НИУ ВШЭ",
        vec![Arc::new(MemorySource::new("Физика", &[(SHARED, Competition::Regular, true)]))],
    );
    let y = institution(
        "itmo",
        "ИТМО",
        vec![Arc::new(MemorySource::new("Информатика", &[(SHARED, Competition::Regular, true)]))],
    );

    // 机构并发为 1，按输入顺序加载，hse 先登记
    let institutions = vec![Institution::new(x), Institution::new(y)];
    let result = load_partition(institutions, LoadMode::Fresh, &context()).await;

    assert_eq!(result.conflicts, 1);
    assert_eq!(result.ledger.len(), 1);
    assert_eq!(result.ledger[SHARED], "hse");
    assert!(quits(find(&result.institutions, "itmo")).contains(SHARED));
}

#[tokio::test]
async fn test_student_without_flag_elsewhere_is_quit_there() {
    let x = institution(
        "hse",
        "НИУ ВШЭ",
        vec![Arc::new(MemorySource::new("Физика", &[(SHARED, Competition::Regular, true)]))],
    );
    let y = institution(
        "itmo",
        "ИТМО",
        vec![Arc::new(MemorySource::new("Информатика", &[(SHARED, Competition::Regular, false)]))],
    );

    let loaded = load_from_definitions(&[x, y], &context()).await;
    assert!(originals(find(&loaded, "hse")).contains(SHARED));
    assert!(quits(find(&loaded, "itmo")).contains(SHARED));
}

#[tokio::test]
async fn test_each_student_committed_to_at_most_one_institution() {
    let students: Vec<String> = (0..20).map(|i| format!("{:013}", i)).collect();
    let mut definitions = Vec::new();
    for (n, code) in ["hse", "itmo", "spbsu", "mipt"].iter().enumerate() {
        // 每个机构给不同的一半考生打上原件标记
        let list: Vec<(&str, Competition, bool)> = students
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), Competition::Regular, (i + n) % 2 == 0))
            .collect();
        definitions.push(institution(
            code,
            &code.to_uppercase(),
            vec![Arc::new(MemorySource::new("Математика", &list))],
        ));
    }

    let mut ctx = context();
    ctx.max_concurrent_institutions = 4;
    let loaded = load_from_definitions(&definitions, &ctx).await;

    for id in &students {
        let committed: Vec<&str> = loaded
            .iter()
            .filter(|i| originals(i).contains(id))
            .map(|i| i.code())
            .collect();
        assert_eq!(committed.len(), 1, "考生 {} 应只在一个机构保留原件", id);
        for inst in loaded.iter().filter(|i| i.code() != committed[0]) {
            assert!(quits(inst).contains(id));
        }
    }
}

// ========== 数据源失败 ==========

#[tokio::test]
async fn test_one_failing_source_does_not_fail_institution() {
    let physics = Arc::new(MemorySource::new("Физика", &[("0000000000001", Competition::Regular, false)]));
    let chemistry = Arc::new(MemorySource::new("Химия", &[("0000000000002", Competition::Bvi, false)]));
    let broken = Arc::new(MemorySource::new("Биология", &[]).failing(usize::MAX));
    let def = institution("spbsu", "СПбГУ", vec![physics.clone(), broken.clone(), chemistry.clone()]);

    let loaded = load_from_definitions(&[def], &context()).await;
    let spbsu = find(&loaded, "spbsu");
    let calc = spbsu.calculator().unwrap();

    assert_eq!(broken.calls(), 3);
    assert_eq!(calc.heading_count(), 2);
    assert_eq!(calc.application_count(), 2);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let flaky = Arc::new(
        MemorySource::new("Физика", &[("0000000000001", Competition::Regular, false)]).failing(2),
    );
    let def = institution("hse", "НИУ ВШЭ", vec![flaky.clone()]);

    let loaded = load_from_definitions(&[def], &context()).await;
    assert_eq!(flaky.calls(), 3);
    assert_eq!(find(&loaded, "hse").calculator().unwrap().application_count(), 1);
}

#[tokio::test]
async fn test_all_sources_failing_gives_empty_calculator() {
    let source: Arc<dyn HeadingSource> =
        Arc::new(MemorySource::new("Физика", &[]).failing(usize::MAX));
    let def = Arc::new(InstitutionDefinition::new("mipt", "МФТИ", vec![source]).sequential());
    let loaded = load_from_definitions(&[def], &context()).await;

    let mipt = find(&loaded, "mipt");
    assert!(mipt.is_prepared());
    assert_eq!(mipt.calculator().unwrap().heading_count(), 0);
    assert!(!mipt.has_data());
}

// ========== 缓存 ==========

#[tokio::test]
async fn test_disabled_cache_always_loads_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let source = Arc::new(MemorySource::new("Физика", &[("0000000000001", Competition::Regular, true)]));
    let defs = vec![institution("hse", "НИУ ВШЭ", vec![source.clone()])];
    let ctx = context();

    for _ in 0..2 {
        let result = assert_ok!(crawl_with_options(&defs, &crawl_options(&cache_dir, -1), &ctx).await);
        assert!(!result.cache_used);
        assert!(result.cache_file.is_none());
    }
    assert_eq!(source.calls(), 2);
    assert!(!cache_dir.exists());
}

#[tokio::test]
async fn test_second_crawl_replays_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(
        "Физика",
        &[
            ("0000000000001", Competition::Regular, true),
            ("0000000000002", Competition::TargetQuota, false),
        ],
    ));
    let empty = Arc::new(MemorySource::new("Пусто", &[]).failing(usize::MAX));
    let defs = vec![
        institution("hse", "НИУ ВШЭ", vec![source.clone()]),
        institution("kfu", "КФУ", vec![empty]),
    ];
    let ctx = context();
    let options = crawl_options(dir.path(), 60);

    let first = assert_ok!(crawl_with_options(&defs, &options, &ctx).await);
    assert!(!first.cache_used);
    let written = first.cache_file.clone().expect("应写入快照");

    // 只有产出数据的机构进入快照
    let file = read_snapshot_file(&written).await.unwrap();
    assert_eq!(file.snapshots.len(), 1);
    assert_eq!(file.snapshots[0].definition.code, "hse");

    let second = assert_ok!(crawl_with_options(&defs[..1], &options, &ctx).await);
    assert!(second.cache_used);
    assert_eq!(second.cache_file.as_deref(), Some(written.as_path()));
    assert_eq!(source.calls(), 1);

    // 回放得到与新鲜加载相同的记录
    let fresh = find(&first.institutions, "hse");
    let replayed = find(&second.institutions, "hse");
    assert_eq!(fresh.cache(), replayed.cache());
    assert_eq!(
        fresh.calculator().unwrap().application_count(),
        replayed.calculator().unwrap().application_count()
    );
    assert_eq!(replayed.calculator().unwrap().application_count(), 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_falls_back_to_fresh_load() {
    let dir = tempfile::tempdir().unwrap();
    let now = chrono::Utc::now().timestamp();
    let corrupt = dir.path().join(format!("{}.snapshot", now - 1));
    tokio::fs::write(&corrupt, b"not a snapshot").await.unwrap();

    let source = Arc::new(MemorySource::new("Физика", &[("0000000000001", Competition::Regular, false)]));
    let defs = vec![institution("hse", "НИУ ВШЭ", vec![source.clone()])];

    let result = assert_ok!(crawl_with_options(&defs, &crawl_options(dir.path(), 60), &context()).await);
    assert!(!result.cache_used);
    assert_eq!(source.calls(), 1);
    let written = result.cache_file.expect("应写入新快照");
    assert_ne!(written, corrupt);
}

#[tokio::test]
async fn test_cached_and_fresh_partitions_prefer_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let options = crawl_options(dir.path(), 60);
    let ctx = context();

    let a_source = Arc::new(MemorySource::new(
        "Физика",
        &[(SHARED, Competition::Regular, true), ("0000000000007", Competition::Regular, true)],
    ));
    let a = institution("hse", "НИУ ВШЭ", vec![a_source.clone()]);
    assert_ok!(crawl_with_options(&[a.clone()], &options, &ctx).await);

    let b = institution(
        "itmo",
        "ИТМО",
        vec![Arc::new(MemorySource::new(
            "Информатика",
            &[(SHARED, Competition::Regular, true), ("0000000000007", Competition::Regular, false)],
        ))],
    );
    let result = assert_ok!(crawl_with_options(&[a, b], &options, &ctx).await);
    assert!(result.cache_used);
    assert_eq!(a_source.calls(), 1);

    let hse = find(&result.institutions, "hse");
    let itmo = find(&result.institutions, "itmo");
    assert!(originals(itmo).contains(SHARED));
    assert!(quits(hse).contains(SHARED));
    assert!(!originals(hse).contains(SHARED));

    // 只在缓存机构交了原件的考生，在新鲜机构标记退出
    assert!(originals(hse).contains("0000000000007"));
    assert!(quits(itmo).contains("0000000000007"));

    // 结果按名称排序
    let names: Vec<&str> = result.institutions.iter().map(|i| i.name()).collect();
    assert_eq!(names, vec!["ИТМО", "НИУ ВШЭ"]);
}

#[tokio::test]
async fn test_load_with_caches_reports_completeness() {
    let source = Arc::new(MemorySource::new("Физика", &[("0000000000001", Competition::Regular, true)]));
    let def = institution("hse", "НИУ ВШЭ", vec![source.clone()]);
    let ctx = context();

    let fresh = load_from_definitions(&[def.clone()], &ctx).await;
    let mut caches = HashMap::new();
    caches.insert("hse".to_string(), fresh[0].cache().clone());
    // 不在请求中的缓存被忽略
    caches.insert("mgu".to_string(), fresh[0].cache().clone());

    let (loaded, complete) = load_with_caches(&[def], caches, &ctx).await;
    assert!(complete);
    assert_eq!(loaded.len(), 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_snapshot_definitions_rebuild_by_kind() {
    let source = Arc::new(MemorySource::new("Физика", &[("0000000000001", Competition::Regular, false)]));
    let def = institution("hse", "НИУ ВШЭ", vec![source]);
    let loaded = load_from_definitions(&[def], &context()).await;

    let bytes = rating_ingest::cache::serialize_snapshots(vec![loaded[0].to_snapshot()], 1).unwrap();
    let file = deserialize_snapshots(&bytes).unwrap();
    let record = file.snapshots[0].definition.clone();

    let mut registry = SourceRegistry::with_builtin();
    assert_err!(record.clone().into_definition(&registry));

    registry.register("memory", |params: JsonValue| {
        let params: MemoryParams = serde_json::from_value(params)
            .map_err(|e| AppError::Other(e.to_string()))?;
        Ok(Arc::new(MemorySource::new(&params.heading, &[])) as Arc<dyn HeadingSource>)
    });
    let rebuilt = assert_ok!(record.clone().into_definition(&registry));
    assert_eq!(rebuilt.to_record(), record);
}

#[tokio::test]
async fn test_nothing_to_load_is_error() {
    let defs = vec![institution("hse", "НИУ ВШЭ", vec![])];
    let mut options = crawl_options(Path::new("unused"), -1);
    options.exclude = vec!["hse".to_string()];
    let result = crawl_with_options(&defs, &options, &context()).await;
    assert!(matches!(result, Err(AppError::Config(ConfigError::NothingToLoad))));
}
