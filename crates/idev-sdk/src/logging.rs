//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` 订阅者，并把 `log` 记录桥接过来
///
/// 过滤规则取自 `RUST_LOG`。重复调用是空操作；
/// 返回值表示本次调用是否真正完成了安装。
pub fn init_logging() -> bool {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    // 已有 log 全局 logger 时保持原样
    let _ = tracing_log::LogTracer::init();
    tracing::debug!("Logging initialized");
    true
}
