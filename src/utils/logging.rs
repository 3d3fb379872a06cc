use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{EnvConfig, FlowConfig};

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - TRIGGERFLOW_DEBUG: 启用详细调试输出，包含每次事件分发
    /// - TRIGGERFLOW_SHOW_EVENT_LOG: 以 info 级别输出事件分发
    ///
    /// 使用示例：
    /// ```no_run
    /// use triggerflow::utils::LoggingConfig;
    ///
    /// fn main() {
    ///     LoggingConfig::init();
    ///     // 现在可以使用 tracing 宏
    /// }
    /// ```
    pub fn init() {
        Self::init_with_config(FlowConfig::global());
    }

    /// 按运行配置初始化日志
    ///
    /// 未设置 RUST_LOG 时，`show_event_log` 决定事件分发日志是否可见。
    pub fn init_with_config(config: &FlowConfig) {
        let is_debug = Self::is_debug();

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(Self::default_directives(is_debug, config.show_event_log))
        });

        let fmt_layer = if is_debug {
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
        } else {
            fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(false)
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();

        tracing::debug!(
            show_event_log = config.show_event_log,
            skip_exceptions = config.skip_exceptions,
            default_timeout = ?config.default_timeout,
            stream_timeout = ?config.stream_timeout,
            "trigger flow logging initialized"
        );
    }

    /// 未设置 RUST_LOG 时的过滤规则
    pub fn default_directives(is_debug: bool, show_event_log: bool) -> &'static str {
        match (is_debug, show_event_log) {
            (true, _) => "triggerflow=debug,info",
            (false, true) => "triggerflow=info,warn",
            (false, false) => "triggerflow=warn",
        }
    }

    /// 初始化日志系统（带自定义过滤器）
    pub fn init_with_filter(filter: &str) {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer())
            .try_init();
    }

    /// 检查是否启用调试模式
    pub fn is_debug() -> bool {
        EnvConfig::is_debug_mode()
    }
}
