//! 程序配置
//!
//! 所有配置项均可通过环境变量覆盖，缺省值硬编码在本模块中。
//! 非法的覆盖值会被记录为 warn 并回退到缺省值。

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use phf::phf_map;
use tracing::{debug, info, warn};

/// 全局并发请求上限（缺省）
const FALLBACK_GLOBAL_LIMIT: usize = 48;

/// 各机构的并发请求上限（缺省）
static DEFAULT_INSTITUTION_LIMITS: phf::Map<&'static str, usize> = phf_map! {
    "hse" => 6,
    "itmo" => 10,
    "mipt" => 1,
    "mirea" => 4,
    "oldhse" => 1,
    "spbstu" => 6,
    "spbsu" => 6,
    "rzgmu" => 3,
    "fmsmu" => 16,
    "rsmu" => 6,
};

/// 各机构的礼貌延迟配置（缺省）
///
/// 元组顺序：批大小、micro 毫秒、main 毫秒、micro 比例区间、main 比例区间
static DEFAULT_POLITENESS: phf::Map<&'static str, (usize, u64, u64, (f64, f64), (f64, f64))> = phf_map! {
    "fmsmu" => (60, 40, 4500, (0.8, 1.2), (0.75, 1.5)),
    "mipt" => (8, 50, 1500, (0.2, 1.8), (0.8, 1.2)),
    "mephi" => (3, 200, 3311, (0.2, 1.8), (0.5, 1.2)),
    "spbsu" => (8, 100, 3333, (0.8, 1.2), (0.8, 1.2)),
};

/// 429 退避序列（秒），循环使用
const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 7] = [10, 12, 15, 12, 15, 15, 30];

/// 单个机构的礼貌延迟配置
#[derive(Clone, Debug, PartialEq)]
pub struct PolitenessProfile {
    /// 是否启用
    pub enabled: bool,
    /// 每批请求数，达到后施加 main 延迟
    pub batch_size: usize,
    /// 批内相邻请求之间的延迟
    pub micro_delay: Duration,
    /// 批与批之间的延迟
    pub main_delay: Duration,
    pub micro_ratio_low: f64,
    pub micro_ratio_high: f64,
    pub main_ratio_low: f64,
    pub main_ratio_high: f64,
}

impl PolitenessProfile {
    /// 无随机抖动的配置（主要用于测试）
    pub fn fixed(batch_size: usize, micro_delay: Duration, main_delay: Duration) -> Self {
        Self {
            enabled: true,
            batch_size,
            micro_delay,
            main_delay,
            micro_ratio_low: 1.0,
            micro_ratio_high: 1.0,
            main_ratio_low: 1.0,
            main_ratio_high: 1.0,
        }
    }
}

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 全局并发请求上限
    pub global_http_max_concurrent: usize,
    /// 各机构并发请求上限（不在表中的机构只受全局上限约束）
    pub institution_limits: HashMap<String, usize>,
    /// 各机构礼貌延迟配置
    pub politeness: HashMap<String, PolitenessProfile>,
    /// 需要 429 退避限流器的机构
    pub backoff_institutions: Vec<String>,
    /// 429 退避序列
    pub backoff_schedule: Vec<Duration>,
    /// 同时加载的机构数量
    pub max_concurrent_institutions: usize,
    /// 单个数据源最大尝试次数
    pub retry_max_attempts: u32,
    /// 重试基础延迟（第 n 次失败后等待 base × 2^(n-1)）
    pub retry_base_delay: Duration,
    /// 数据源与消费者之间的缓冲队列容量
    pub channel_capacity: usize,
    /// 快照缓存目录
    pub cache_dir: PathBuf,
    /// 快照缓存有效期（分钟），-1 表示禁用缓存
    pub cache_ttl_minutes: i64,
    /// 机构定义 TOML 文件存放目录
    pub definitions_folder: PathBuf,
    /// 需要加载的机构（"all" 表示全部）
    pub institutions: Vec<String>,
    /// 排除的机构
    pub exclude_institutions: Vec<String>,
    /// 单次 HTTP 请求超时
    pub http_timeout: Duration,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global_http_max_concurrent: FALLBACK_GLOBAL_LIMIT,
            institution_limits: DEFAULT_INSTITUTION_LIMITS
                .entries()
                .map(|(code, limit)| (code.to_string(), *limit))
                .collect(),
            politeness: DEFAULT_POLITENESS
                .entries()
                .map(|(code, profile)| (code.to_string(), default_profile(*profile)))
                .collect(),
            backoff_institutions: vec!["spbsu".to_string()],
            backoff_schedule: DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            max_concurrent_institutions: 4,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(10),
            channel_capacity: 100,
            cache_dir: PathBuf::from("cache"),
            cache_ttl_minutes: 60,
            definitions_folder: PathBuf::from("institutions"),
            institutions: vec!["all".to_string()],
            exclude_institutions: Vec::new(),
            http_timeout: Duration::from_secs(30),
            verbose_logging: false,
        }
    }
}

fn default_profile(
    (batch_size, micro_ms, main_ms, micro, main): (usize, u64, u64, (f64, f64), (f64, f64)),
) -> PolitenessProfile {
    PolitenessProfile {
        enabled: true,
        batch_size,
        micro_delay: Duration::from_millis(micro_ms),
        main_delay: Duration::from_millis(main_ms),
        micro_ratio_low: micro.0,
        micro_ratio_high: micro.1,
        main_ratio_low: main.0,
        main_ratio_high: main.1,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 从任意键值来源构建配置（`from_env` 使用进程环境变量）
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let env = EnvReader { lookup: &lookup };

        let global_http_max_concurrent = env.positive(
            "GLOBAL_HTTP_MAX_CONCURRENT",
            default.global_http_max_concurrent,
        );
        info!("全局并发请求上限: {}", global_http_max_concurrent);

        let mut institution_limits = default.institution_limits.clone();
        for (code, limit) in institution_limits.iter_mut() {
            let var_name = format!("{}_HTTP_MAX_CONCURRENT", code.to_uppercase());
            *limit = env.positive(&var_name, *limit);
            debug!("[机构 {}] 并发请求上限: {}", code, limit);
        }

        let mut politeness = default.politeness.clone();
        for (code, profile) in politeness.iter_mut() {
            *profile = env.politeness_profile(code, profile.clone());
        }

        let backoff_institutions = env
            .get("BACKOFF_INSTITUTIONS")
            .map(|v| split_list(&v))
            .unwrap_or(default.backoff_institutions);

        Self {
            global_http_max_concurrent,
            institution_limits,
            politeness,
            backoff_institutions,
            backoff_schedule: default.backoff_schedule,
            max_concurrent_institutions: env.positive(
                "MAX_CONCURRENT_INSTITUTIONS",
                default.max_concurrent_institutions,
            ),
            retry_max_attempts: env.positive("SOURCE_RETRY_ATTEMPTS", default.retry_max_attempts),
            retry_base_delay: Duration::from_millis(env.parsed(
                "SOURCE_RETRY_BASE_DELAY_MS",
                default.retry_base_delay.as_millis() as u64,
                |_| true,
            )),
            channel_capacity: env.positive("SOURCE_CHANNEL_CAPACITY", default.channel_capacity),
            cache_dir: env
                .get("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.cache_dir),
            cache_ttl_minutes: env.parsed("CACHE_TTL_MINUTES", default.cache_ttl_minutes, |v| {
                *v == -1 || *v >= 0
            }),
            definitions_folder: env
                .get("DEFINITIONS_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.definitions_folder),
            institutions: env
                .get("INSTITUTIONS")
                .map(|v| split_list(&v))
                .unwrap_or(default.institutions),
            exclude_institutions: env
                .get("EXCLUDE_INSTITUTIONS")
                .map(|v| split_list(&v))
                .unwrap_or(default.exclude_institutions),
            http_timeout: Duration::from_secs(env.positive(
                "HTTP_TIMEOUT_SECS",
                default.http_timeout.as_secs(),
            )),
            verbose_logging: env.parsed("VERBOSE_LOGGING", default.verbose_logging, |_| true),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 读取并校验环境变量覆盖值
struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    /// 解析覆盖值，解析失败或校验不通过时回退到缺省值并记录 warn
    fn parsed<T>(&self, name: &str, default: T, valid: impl Fn(&T) -> bool) -> T
    where
        T: FromStr + std::fmt::Debug,
    {
        let Some(raw) = self.get(name) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => value,
            _ => {
                warn!(
                    "⚠️ 环境变量 {} 的值 '{}' 不合法，使用缺省值 {:?}",
                    name, raw, default
                );
                default
            }
        }
    }

    fn positive<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug + PartialOrd + Default,
    {
        self.parsed(name, default, |v| *v > T::default())
    }

    fn politeness_profile(&self, code: &str, mut profile: PolitenessProfile) -> PolitenessProfile {
        let prefix = format!("{}_HTTP_TIMEOUT", code.to_uppercase());
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        profile.enabled = self.parsed(&var("ENABLED"), profile.enabled, |_| true);
        profile.batch_size = self.positive(&var("BATCH_SIZE"), profile.batch_size);
        profile.micro_delay = Duration::from_millis(
            self.positive(&var("MICRO_MS"), profile.micro_delay.as_millis() as u64),
        );
        profile.main_delay = Duration::from_millis(
            self.positive(&var("MAIN_MS"), profile.main_delay.as_millis() as u64),
        );
        profile.micro_ratio_low = self.positive(&var("MICRO_RATIO_LOW"), profile.micro_ratio_low);
        profile.micro_ratio_high =
            self.positive(&var("MICRO_RATIO_HIGH"), profile.micro_ratio_high);
        profile.main_ratio_low = self.positive(&var("MAIN_RATIO_LOW"), profile.main_ratio_low);
        profile.main_ratio_high = self.positive(&var("MAIN_RATIO_HIGH"), profile.main_ratio_high);

        if profile.enabled {
            info!(
                "[机构 {}] 礼貌延迟: 每批 {} 个请求, micro {:?}, main {:?}",
                code, profile.batch_size, profile.micro_delay, profile.main_delay
            );
        } else {
            debug!("[机构 {}] 礼貌延迟已禁用", code);
        }
        profile
    }
}
