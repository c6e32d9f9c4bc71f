//! 单个机构的数据加载流程
//!
//! 多个数据源（并发或串行）→ 两个有界队列 → 单一消费者缓冲 →
//! 先写入全部专业，再写入全部申请。计算器只在这里被写入。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::models::{ApplicationData, HeadingData};
use crate::services::{
    Calculator, CalculatorFactory, DataReceiver, HeadingSource, SourceContext,
};
use crate::workflow::{Institution, LoadContext};

/// 把数据源推送的记录转发到消费者队列
#[derive(Clone)]
struct ChannelReceiver {
    code: String,
    headings: mpsc::Sender<HeadingData>,
    applications: mpsc::Sender<ApplicationData>,
}

#[async_trait]
impl DataReceiver for ChannelReceiver {
    async fn put_heading_data(&self, heading: HeadingData) {
        if self.headings.send(heading).await.is_err() {
            debug!("[机构 {}] 消费者已退出，丢弃专业记录", self.code);
        }
    }

    async fn put_application_data(&self, application: ApplicationData) {
        if self.applications.send(application).await.is_err() {
            debug!("[机构 {}] 消费者已退出，丢弃申请记录", self.code);
        }
    }
}

/// 消费者：排空两个队列直到都关闭，返回缓冲的全部记录
fn spawn_consumer(
    mut headings_rx: mpsc::Receiver<HeadingData>,
    mut applications_rx: mpsc::Receiver<ApplicationData>,
) -> JoinHandle<(Vec<HeadingData>, Vec<ApplicationData>)> {
    tokio::spawn(async move {
        let mut headings = Vec::new();
        let mut applications = Vec::new();
        let mut headings_open = true;
        let mut applications_open = true;

        while headings_open || applications_open {
            tokio::select! {
                heading = headings_rx.recv(), if headings_open => match heading {
                    Some(h) => headings.push(h),
                    None => headings_open = false,
                },
                application = applications_rx.recv(), if applications_open => match application {
                    Some(a) => applications.push(a),
                    None => applications_open = false,
                },
            }
        }
        (headings, applications)
    })
}

/// 带重试地执行单个数据源
async fn run_source(
    source: Arc<dyn HeadingSource>,
    receiver: ChannelReceiver,
    source_ctx: SourceContext,
    ctx: LoadContext,
) -> AppResult<()> {
    let name = format!("[机构 {}] 数据源 {}", source_ctx.institution_code, source.descriptor());
    ctx.retry
        .run(&name, &source_ctx.cancel, || {
            source.load_to(&receiver, &source_ctx)
        })
        .await
}

/// 从全部数据源新鲜加载一个机构
///
/// 单个数据源重试耗尽只影响它自己；所有数据源都失败时机构得到一个空计算器。
///
/// # 返回
/// 在本机构提交了原件的考生集合
pub async fn load_from_sources(institution: &mut Institution, ctx: &LoadContext) -> HashSet<String> {
    institution.prepare(&ctx.calculator_factory);
    institution.cache_mut().reset();

    let definition = institution.definition().clone();
    let code = definition.code.clone();
    log_load_start(&code, definition.sources.len(), definition.sequential);

    let (headings_tx, headings_rx) = mpsc::channel(ctx.channel_capacity);
    let (applications_tx, applications_rx) = mpsc::channel(ctx.channel_capacity);
    let consumer = spawn_consumer(headings_rx, applications_rx);

    let receiver = ChannelReceiver {
        code: code.clone(),
        headings: headings_tx,
        applications: applications_tx,
    };
    let source_ctx = |ctx: &LoadContext| SourceContext {
        institution_code: code.clone(),
        throttle: ctx.throttle.clone(),
        http: ctx.http.clone(),
        cancel: ctx.cancel.child_token(),
    };

    let mut failed = 0usize;
    if definition.sequential {
        for source in &definition.sources {
            let result =
                run_source(source.clone(), receiver.clone(), source_ctx(ctx), ctx.clone()).await;
            if let Err(e) = result {
                log_source_failed(&code, source.as_ref(), &e.to_string());
                failed += 1;
            }
        }
    } else {
        let handles = definition.sources.iter().map(|source| {
            tokio::spawn(run_source(
                source.clone(),
                receiver.clone(),
                source_ctx(ctx),
                ctx.clone(),
            ))
        });
        let outcomes = join_all(handles).await;
        for (source, outcome) in definition.sources.iter().zip(outcomes) {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log_source_failed(&code, source.as_ref(), &e.to_string());
                    failed += 1;
                }
                Err(e) => {
                    log_source_failed(&code, source.as_ref(), &format!("任务异常: {}", e));
                    failed += 1;
                }
            }
        }
    }

    // 关闭队列，消费者随后退出
    drop(receiver);
    let (headings, applications) = match consumer.await {
        Ok(records) => records,
        Err(e) => {
            error!("[机构 {}] 消费者任务异常: {}", code, e);
            (Vec::new(), Vec::new())
        }
    };

    let cache = institution.cache_mut();
    for heading in &headings {
        cache.save_heading(heading.clone());
    }
    for application in &applications {
        cache.save_application(application.clone());
    }

    let originals = match institution.calculator_mut() {
        Some(calc) => apply_records(calc, &code, &headings, &applications),
        None => HashSet::new(),
    };
    log_load_complete(
        &code,
        definition.sources.len() - failed,
        definition.sources.len(),
        headings.len(),
        applications.len(),
        originals.len(),
    );
    originals
}

/// 用缓存中的记录回放一个机构，不涉及任何网络、限流或重试
pub fn replay(institution: &mut Institution, factory: &CalculatorFactory) -> HashSet<String> {
    institution.prepare(factory);
    let code = institution.code().to_string();
    let cache = std::mem::take(institution.cache_mut());
    let originals = match institution.calculator_mut() {
        Some(calc) => apply_records(calc, &code, cache.headings(), cache.applications()),
        None => HashSet::new(),
    };
    debug!(
        "[机构 {}] 从缓存回放: {} 个专业, {} 条申请",
        code,
        cache.headings().len(),
        cache.applications().len()
    );
    *institution.cache_mut() = cache;
    originals
}

/// 两遍写入：先全部专业，再全部申请，最后规范化
///
/// 配额类申请如果没有提交原件，不写入计算器。
///
/// # 返回
/// 在本机构提交了原件的考生集合
pub fn apply_records(
    calculator: &mut dyn Calculator,
    code: &str,
    headings: &[HeadingData],
    applications: &[ApplicationData],
) -> HashSet<String> {
    for heading in headings {
        calculator.add_heading(&heading.code, heading.capacities, &heading.pretty_name);
    }

    let mut originals = HashSet::new();
    let mut dropped = 0usize;
    for app in applications {
        if app.original_submitted {
            originals.insert(app.student_id.clone());
        }
        if app.competition_type.is_quota() && !app.original_submitted {
            dropped += 1;
            continue;
        }
        calculator.add_application(
            &app.heading_code,
            &app.student_id,
            app.rating_place,
            app.priority,
            app.competition_type,
            app.scores_sum,
        );
    }
    calculator.normalize_applications();

    if dropped > 0 {
        debug!("[机构 {}] 忽略 {} 条未交原件的配额申请", code, dropped);
    }
    originals
}

// ========== 日志辅助函数 ==========

fn log_load_start(code: &str, sources: usize, sequential: bool) {
    info!(
        "📥 [机构 {}] 开始加载 {} 个数据源 ({})",
        code,
        sources,
        if sequential { "串行" } else { "并发" }
    );
}

fn log_source_failed(code: &str, source: &dyn HeadingSource, reason: &str) {
    warn!(
        "⚠️ [机构 {}] 数据源 {} 加载失败，已跳过: {}",
        code,
        source.descriptor(),
        reason
    );
}

fn log_load_complete(
    code: &str,
    succeeded: usize,
    total: usize,
    headings: usize,
    applications: usize,
    originals: usize,
) {
    info!(
        "✅ [机构 {}] 加载完成: 数据源 {}/{}, {} 个专业, {} 条申请, {} 人已交原件",
        code, succeeded, total, headings, applications, originals
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capacities, Competition};
    use crate::services::VarsityCalculator;
    use std::collections::BTreeMap;

    fn application(heading: &HeadingData, id: &str, kind: Competition, original: bool) -> ApplicationData {
        ApplicationData {
            heading_code: heading.code.clone(),
            student_id: id.to_string(),
            scores_sum: 200,
            rating_place: 1,
            priority: 1,
            competition_type: kind,
            original_submitted: original,
            disambiguation: BTreeMap::new(),
        }
    }

    #[test]
    fn test_quota_without_original_is_dropped() {
        let heading = HeadingData::new("Химия", Capacities::default());
        let apps = vec![
            application(&heading, "1", Competition::Regular, false),
            application(&heading, "2", Competition::Bvi, false),
            application(&heading, "3", Competition::TargetQuota, false),
            application(&heading, "4", Competition::SpecialQuota, true),
            application(&heading, "5", Competition::DedicatedQuota, false),
        ];
        let mut calc = VarsityCalculator::new("hse");
        let originals = apply_records(&mut calc, "hse", &[heading], &apps);

        assert_eq!(calc.application_count(), 3);
        assert_eq!(originals, HashSet::from(["4".to_string()]));
    }

    #[test]
    fn test_headings_applied_before_applications() {
        // 申请在前、专业在后，两遍写入后申请依然生效
        let heading = HeadingData::new("Биология", Capacities::default());
        let apps = vec![application(&heading, "1", Competition::Regular, true)];
        let mut calc = VarsityCalculator::new("hse");
        apply_records(&mut calc, "hse", std::slice::from_ref(&heading), &apps);
        assert_eq!(calc.application_count(), 1);
    }
}
