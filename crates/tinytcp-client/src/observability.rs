use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志订阅器安装失败的原因。
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// `install` 被重复调用。
    #[error("tinytcp logging is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 为宿主进程安装默认的日志订阅器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 库本身只通过 `tracing` 宏产出事件；可执行程序或演示代码调用一次即可看到客户端日志。
///
/// ## 逻辑 (How)
/// - `registry + EnvFilter + fmt` 三层组合；过滤规则优先读取 `RUST_LOG`，缺省为 `info`。
///
/// ## 契约 (What)
/// - 多次调用返回 [`ObservabilityError::AlreadyInstalled`]；
/// - 外部已设置 Subscriber 时返回 [`ObservabilityError::SubscriberAlreadySet`]，不覆盖宿主配置。
pub fn install() -> Result<(), ObservabilityError> {
    if INSTALLED.get().is_some() {
        return Err(ObservabilityError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(ObservabilityError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| ObservabilityError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
