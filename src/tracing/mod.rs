//! # 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 输出。`RUST_LOG` 优先于配置文件中的日志级别。

use tracing_subscriber::{EnvFilter, fmt};

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），为 None 时使用默认配置（info 级别）
///
/// # 返回
/// 已经初始化过全局 subscriber 时返回 `false`，不会 panic
///
/// # 示例
/// ```rust,ignore
/// use kogo_pagination::config::load_config;
/// use kogo_pagination::tracing::init_tracing_from_config;
///
/// let config = load_config(None);
/// init_tracing_from_config(Some(&config.logging));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&crate::config::LoggingConfig>) -> bool {
    let default_config = crate::config::LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(config.level.as_str()),
    };

    fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter)
        .try_init()
        .is_ok()
}
