use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 内置起始事件
pub const START: &str = "START";

/// 触发器类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Event,
    FlowData,
    RuntimeData,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Event => "event",
            TriggerKind::FlowData => "flow_data",
            TriggerKind::RuntimeData => "runtime_data",
        }
    }

    pub const ALL: [TriggerKind; 3] = [
        TriggerKind::Event,
        TriggerKind::FlowData,
        TriggerKind::RuntimeData,
    ];
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 触发器：类型 + 名称
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub name: String,
}

impl Trigger {
    pub fn new(kind: TriggerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::new(TriggerKind::Event, name)
    }

    pub fn runtime_data(key: impl Into<String>) -> Self {
        Self::new(TriggerKind::RuntimeData, key)
    }

    pub fn flow_data(key: impl Into<String>) -> Self {
        Self::new(TriggerKind::FlowData, key)
    }

    pub fn start() -> Self {
        Self::event(START)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl From<&str> for Trigger {
    fn from(name: &str) -> Self {
        Trigger::event(name)
    }
}

impl From<String> for Trigger {
    fn from(name: String) -> Self {
        Trigger::event(name)
    }
}

impl From<&Trigger> for Trigger {
    fn from(trigger: &Trigger) -> Self {
        trigger.clone()
    }
}

/// 多触发器汇合模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// 所有触发器都至少到达一次后触发
    #[default]
    And,
    /// 最先到达者胜出，转发 `{kind, trigger, value}`
    Or,
    /// 最先到达者胜出，只转发值
    SimpleOr,
}

/// collect 汇合模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectMode {
    /// 填满后每次更新都再次触发
    #[default]
    FilledAndUpdate,
    /// 填满后触发一次并清空所有槽位
    FilledThenEmpty,
}

/// match 分支命中模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    HitFirst,
    HitAll,
}

/// for_each 选项
#[derive(Clone, Debug, Default)]
pub struct ForEachOptions {
    pub with_index: bool,
    pub concurrency: Option<usize>,
}

impl ForEachOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, with_index: bool) -> Self {
        self.with_index = with_index;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }
}

/// batch 选项
#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    pub side_branch: bool,
    pub concurrency: Option<usize>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side_branch(mut self, side_branch: bool) -> Self {
        self.side_branch = side_branch;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }
}

/// 启动选项
#[derive(Clone, Debug)]
pub struct StartOptions {
    pub wait_for_result: bool,
    pub timeout: Option<Duration>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            wait_for_result: true,
            timeout: crate::config::FlowConfig::global().default_timeout,
        }
    }
}

impl StartOptions {
    pub fn no_wait() -> Self {
        Self {
            wait_for_result: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 生成合成触发器名称：`<prefix>-<uuid>`
pub(crate) fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

pub(crate) fn new_mark() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
