// 配置模块

mod env;

pub use env::EnvConfig;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

static GLOBAL_CONFIG: Lazy<FlowConfig> = Lazy::new(|| {
    FlowConfig::from_env().unwrap_or_else(|error| {
        warn!(error = %error, "invalid trigger flow environment config, using defaults");
        FlowConfig::default()
    })
});

/// TriggerFlow 运行配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// 等待结果的默认超时，`None` 表示一直等待
    pub default_timeout: Option<Duration>,
    /// 运行时流的默认空闲超时
    pub stream_timeout: Option<Duration>,
    /// 处理函数失败时是否忽略并继续
    pub skip_exceptions: bool,
    /// 以 info 级别输出每次事件分发
    pub show_event_log: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(10)),
            stream_timeout: Some(Duration::from_secs(10)),
            skip_exceptions: false,
            show_event_log: false,
        }
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取环境变量覆盖默认值
    ///
    /// - TRIGGERFLOW_TIMEOUT_SECS
    /// - TRIGGERFLOW_STREAM_TIMEOUT_SECS
    /// - TRIGGERFLOW_SKIP_EXCEPTIONS
    /// - TRIGGERFLOW_SHOW_EVENT_LOG
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(timeout) = EnvConfig::get_timeout("TRIGGERFLOW_TIMEOUT_SECS")? {
            config.default_timeout = timeout;
        }
        if let Some(timeout) = EnvConfig::get_timeout("TRIGGERFLOW_STREAM_TIMEOUT_SECS")? {
            config.stream_timeout = timeout;
        }
        if let Some(flag) = EnvConfig::get_flag("TRIGGERFLOW_SKIP_EXCEPTIONS") {
            config.skip_exceptions = flag;
        }
        if let Some(flag) = EnvConfig::get_flag("TRIGGERFLOW_SHOW_EVENT_LOG") {
            config.show_event_log = flag;
        }
        Ok(config)
    }

    /// 进程级默认配置，首次访问时从环境变量加载
    pub fn global() -> &'static FlowConfig {
        &GLOBAL_CONFIG
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_skip_exceptions(mut self, skip: bool) -> Self {
        self.skip_exceptions = skip;
        self
    }

    pub fn with_event_log(mut self, show: bool) -> Self {
        self.show_event_log = show;
        self
    }
}
