use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 调用方取消（关闭 / 超时），永远不重试
    #[error("操作已取消")]
    Cancelled,
    /// 数据源相关错误
    #[error("数据源错误: {0}")]
    Source(#[from] SourceError),
    /// 快照缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] CacheError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 数据源相关错误
#[derive(Debug, Error)]
pub enum SourceError {
    /// 网络请求失败
    #[error("请求失败 ({url}): {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// 上游返回了非成功状态码
    #[error("上游返回错误状态 ({url}): {status}")]
    BadStatus { url: String, status: u16 },
    /// 响应或文件内容解析失败
    #[error("解析失败 ({what}): {source}")]
    ParseFailed {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    /// 读取本地文件失败
    #[error("读取文件失败 ({}): {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 学号无法规范化
    #[error("学号 {raw:?} 规范化后超过 13 位")]
    InvalidStudentId { raw: String },
    /// 未注册的数据源类型
    #[error("未知的数据源类型: {kind}")]
    UnknownKind { kind: String },
    /// 数据源参数不合法
    #[error("数据源 {kind} 参数不合法: {source}")]
    InvalidParams {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 快照缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    /// 缓存目录无法读取或创建
    #[error("缓存目录不可用 ({}): {source}", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 读写缓存文件失败
    #[error("缓存文件读写失败 ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 编码失败
    #[error("快照编码失败: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// 解码失败（文件损坏或格式不兼容）
    #[error("快照解码失败: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// 格式版本不匹配
    #[error("不支持的快照格式版本: {found}, 期望 {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 过滤后没有任何机构需要加载
    #[error("过滤后没有可加载的机构")]
    NothingToLoad,
    /// 定义目录不存在
    #[error("目录不存在: {}", path.display())]
    DirectoryNotFound { path: PathBuf },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 机构代码重复
    #[error("机构代码重复: {code}")]
    DuplicateInstitution { code: String },
}

// ========== 从常见错误类型转换 ==========

impl From<bincode::error::EncodeError> for AppError {
    fn from(err: bincode::error::EncodeError) -> Self {
        AppError::Cache(CacheError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for AppError {
    fn from(err: bincode::error::DecodeError) -> Self {
        AppError::Cache(CacheError::Decode(err))
    }
}

impl From<tokio::sync::AcquireError> for AppError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        AppError::Other(format!("信号量已关闭: {}", err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 是否为取消错误（取消错误不参与重试）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// 创建请求失败错误
    pub fn request_failed(url: impl Into<String>, source: reqwest::Error) -> Self {
        AppError::Source(SourceError::RequestFailed {
            url: url.into(),
            source,
        })
    }

    /// 创建解析失败错误
    pub fn parse_failed(what: impl Into<String>, source: serde_json::Error) -> Self {
        AppError::Source(SourceError::ParseFailed {
            what: what.into(),
            source,
        })
    }

    /// 创建缓存文件读写错误
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Cache(CacheError::Io {
            path: path.into(),
            source,
        })
    }

    /// 创建缓存目录不可用错误
    pub fn cache_dir_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Cache(CacheError::DirectoryUnavailable {
            path: path.into(),
            source,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
