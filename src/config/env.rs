use crate::error::{Result, TriggerFlowError};
use std::env;
use std::time::Duration;

/// 环境变量配置读取
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key).map_err(|_| TriggerFlowError::Config(format!("环境变量 '{}' 未设置", key)))
    }

    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 布尔开关：`1` / `true` / `yes` / `on` 视为开启
    pub fn get_flag(key: &str) -> Option<bool> {
        Self::get_env_optional(key).map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// 以秒为单位的超时；`none` / `0` 表示无限等待
    pub fn get_timeout(key: &str) -> Result<Option<Option<Duration>>> {
        let Some(raw) = Self::get_env_optional(key) else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("none") {
            return Ok(Some(None));
        }
        let secs: f64 = raw
            .parse()
            .map_err(|_| TriggerFlowError::Config(format!("{} 不是合法的秒数: {}", key, raw)))?;
        if secs < 0.0 {
            return Err(TriggerFlowError::Config(format!("{} 不能为负数: {}", key, raw)));
        }
        if secs == 0.0 {
            return Ok(Some(None));
        }
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|_| TriggerFlowError::Config(format!("{} 超出可表示的时长: {}", key, raw)))?;
        Ok(Some(Some(timeout)))
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var("TRIGGERFLOW_DEBUG").is_ok()
    }
}
