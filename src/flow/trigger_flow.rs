use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::FlowConfig;
use crate::error::Result;
use crate::flow::blueprint::BluePrint;
use crate::flow::builder::Process;
use crate::flow::chunk::{Chunk, Step};
use crate::flow::conditions::CaseCondition;
use crate::flow::handler::Handler;
use crate::flow::types::{
    BatchOptions, CollectMode, ForEachOptions, JoinMode, MatchMode, StartOptions, Trigger,
};
use crate::runtime::{DataChange, Execution, FlowData, RuntimeStream};

/// 触发流：持有蓝图、共享流程数据和存活执行实例的登记表
///
/// 构建方法都从 `START` 处的游标开始；`when*` 可以从任意触发器开始。
pub struct TriggerFlow {
    blue_print: RwLock<BluePrint>,
    flow_data: Arc<FlowData>,
    config: FlowConfig,
}

impl TriggerFlow {
    pub fn new() -> Self {
        Self::with_blue_print(BluePrint::new())
    }

    pub fn with_blue_print(blue_print: BluePrint) -> Self {
        Self {
            blue_print: RwLock::new(blue_print),
            flow_data: FlowData::new(),
            config: FlowConfig::global().clone(),
        }
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn blue_print(&self) -> BluePrint {
        self.blue_print.read().clone()
    }

    pub(crate) fn flow_data(&self) -> &Arc<FlowData> {
        &self.flow_data
    }

    /// 复制当前蓝图
    pub fn save_blue_print(&self) -> BluePrint {
        self.blue_print.read().copy(None)
    }

    /// 替换蓝图，只影响之后创建的执行实例
    pub fn load_blue_print(&self, blue_print: BluePrint) {
        debug!(blue_print = %blue_print.name(), "blue print loaded");
        *self.blue_print.write() = blue_print;
    }

    // 具名 chunk

    pub fn chunk(&self, name: &str, handler: Handler) -> Chunk {
        let chunk = Chunk::named(name, handler);
        self.blue_print.read().register_chunk(chunk.clone());
        chunk
    }

    pub fn get_chunk(&self, name: &str) -> Option<Chunk> {
        self.blue_print.read().chunk(name)
    }

    // 构建入口

    fn start_process(&self) -> Process {
        Process::root(Trigger::start(), self.blue_print())
    }

    pub fn when(&self, trigger: impl Into<Trigger>) -> Process {
        Process::root(trigger.into(), self.blue_print())
    }

    pub fn when_event(&self, event: &str) -> Process {
        self.when(Trigger::event(event))
    }

    pub fn when_runtime_data(&self, key: &str) -> Process {
        self.when(Trigger::runtime_data(key))
    }

    pub fn when_flow_data(&self, key: &str) -> Process {
        self.when(Trigger::flow_data(key))
    }

    pub fn when_all<I, T>(&self, triggers: I, mode: JoinMode) -> Result<Process>
    where
        I: IntoIterator<Item = T>,
        T: Into<Trigger>,
    {
        self.start_process().when_all(triggers, mode)
    }

    pub fn to(&self, step: impl Into<Step>) -> Process {
        self.start_process().to(step)
    }

    pub fn to_named(&self, name: &str) -> Result<Process> {
        self.start_process().to_named(name)
    }

    pub fn side_branch(&self, step: impl Into<Step>) -> Process {
        self.start_process().side_branch(step)
    }

    pub fn batch<I, S>(&self, steps: I) -> Process
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.start_process().batch(steps)
    }

    pub fn batch_with<I, S>(&self, steps: I, options: BatchOptions) -> Process
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.start_process().batch_with(steps, options)
    }

    pub fn for_each(&self) -> Process {
        self.start_process().for_each()
    }

    pub fn for_each_with(&self, options: ForEachOptions) -> Process {
        self.start_process().for_each_with(options)
    }

    pub fn match_on(&self, mode: MatchMode) -> Process {
        self.start_process().match_on(mode)
    }

    pub fn if_condition(&self, condition: impl Into<CaseCondition>) -> Result<Process> {
        self.start_process().if_condition(condition)
    }

    pub fn collect(&self, name: &str, branch_id: Option<&str>, mode: CollectMode) -> Process {
        self.start_process().collect(name, branch_id, mode)
    }

    // 执行实例

    pub fn create_execution(&self) -> Execution {
        self.create_execution_with(None, self.config.skip_exceptions)
    }

    pub fn create_execution_with(&self, id: Option<String>, skip_exceptions: bool) -> Execution {
        self.blue_print()
            .create_execution(self, id, skip_exceptions)
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        self.flow_data.get_execution(id)
    }

    /// 从登记表移除，之后的流程数据变更不再广播给它
    pub fn remove_execution(&self, id: &str) -> bool {
        self.flow_data.remove(id)
    }

    /// 登记表中仍存活的执行实例数
    pub fn execution_count(&self) -> usize {
        self.flow_data.live_count()
    }

    /// 创建执行实例并发出 `START`，等待本轮分发结束后返回该实例
    pub async fn start_execution(&self, initial_value: Value) -> Result<Execution> {
        let execution = self.create_execution();
        execution.start(initial_value).await?;
        Ok(execution)
    }

    /// 启动并在配置的默认超时内等待结果
    pub async fn start(&self, initial_value: Value) -> Result<Option<Value>> {
        let options = StartOptions::default().with_timeout(self.config.default_timeout);
        self.start_with(initial_value, options).await
    }

    pub async fn start_with(
        &self,
        initial_value: Value,
        options: StartOptions,
    ) -> Result<Option<Value>> {
        let execution = self.create_execution();
        let result = if options.wait_for_result {
            execution
                .start_and_wait(initial_value, options.timeout)
                .await
        } else {
            execution.start(initial_value).await.map(|_| None)
        };
        // 该实例不对外暴露，返回后即从登记表移除
        self.flow_data.remove(execution.id());
        result
    }

    /// 为新的执行实例取得运行时流；拉取时才会启动
    pub fn runtime_stream(&self, initial_value: Value) -> Result<RuntimeStream> {
        self.create_execution().runtime_stream(initial_value)
    }

    pub fn runtime_stream_with_timeout(
        &self,
        initial_value: Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeStream> {
        self.create_execution()
            .runtime_stream_with_timeout(initial_value, timeout)
    }

    // 流程数据

    pub fn get_flow_data(&self, key: &str) -> Option<Value> {
        self.flow_data.get(key)
    }

    pub fn flow_data_snapshot(&self) -> serde_json::Map<String, Value> {
        self.flow_data.snapshot()
    }

    pub async fn set_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_flow_data(DataChange::Set, key, value, true)
            .await
    }

    pub async fn append_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_flow_data(DataChange::Append, key, value, true)
            .await
    }

    pub async fn delete_flow_data(&self, key: &str) -> Result<()> {
        self.update_flow_data(DataChange::Delete, key, Value::Null, true)
            .await
    }

    /// 修改流程数据；`emit` 为真时广播给所有订阅了该键的存活执行实例
    pub async fn update_flow_data(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        self.flow_data.change(change, key, value, emit).await
    }
}

impl Default for TriggerFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TriggerFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerFlow")
            .field("blue_print", &*self.blue_print.read())
            .field("config", &self.config)
            .finish()
    }
}
