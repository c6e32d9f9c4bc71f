use anyhow::Result;
use rating_ingest::{init_logging, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（配置解析本身也会输出日志，所以先于配置）
    let verbose = std::env::var("VERBOSE_LOGGING")
        .map(|v| v.trim() == "true")
        .unwrap_or(false);
    init_logging(verbose);

    // 加载配置
    let config = Config::from_env();

    // 初始化并运行应用
    let _result = App::initialize(config).await?.run().await?;

    Ok(())
}
