use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::flow::types::{new_mark, Trigger, TriggerKind};

use super::execution::{DataChange, Execution};

/// 单次分发给处理函数的事件数据
///
/// 层级标记栈用于在嵌套的 for_each / match 并行分支之间关联回正确的实例，
/// 每次压栈都会复制一份，互不影响。
#[derive(Clone)]
pub struct EventData {
    trigger: Trigger,
    value: Value,
    execution: Execution,
    layer_marks: Vec<String>,
}

impl EventData {
    pub(crate) fn new(
        trigger: Trigger,
        value: Value,
        execution: Execution,
        layer_marks: Vec<String>,
    ) -> Self {
        Self {
            trigger,
            value,
            execution,
            layer_marks,
        }
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn trigger_name(&self) -> &str {
        &self.trigger.name
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn execution_id(&self) -> &str {
        self.execution.id()
    }

    // 层级标记

    pub fn layer_marks(&self) -> &[String] {
        &self.layer_marks
    }

    pub fn layer_mark(&self) -> Option<&str> {
        self.layer_marks.last().map(String::as_str)
    }

    pub fn upper_layer_mark(&self) -> Option<&str> {
        let len = self.layer_marks.len();
        if len < 2 {
            return None;
        }
        Some(self.layer_marks[len - 2].as_str())
    }

    /// 压入新的层级标记并返回它
    pub fn layer_in(&mut self) -> String {
        let mark = new_mark();
        self.layer_marks.push(mark.clone());
        mark
    }

    pub fn layer_out(&mut self) -> Option<String> {
        self.layer_marks.pop()
    }

    // 运行时数据

    pub fn get_runtime_data(&self, key: &str) -> Option<Value> {
        self.execution.get_runtime_data(key)
    }

    pub async fn set_runtime_data(&self, key: &str, value: Value) -> Result<()> {
        self.execution.set_runtime_data(key, value).await
    }

    pub async fn append_runtime_data(&self, key: &str, value: Value) -> Result<()> {
        self.execution.append_runtime_data(key, value).await
    }

    pub async fn delete_runtime_data(&self, key: &str) -> Result<()> {
        self.execution.delete_runtime_data(key).await
    }

    pub async fn update_runtime_data(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        self.execution
            .update_runtime_data(change, key, value, emit)
            .await
    }

    // 流程共享数据

    pub fn get_flow_data(&self, key: &str) -> Option<Value> {
        self.execution.get_flow_data(key)
    }

    pub async fn set_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.execution.set_flow_data(key, value).await
    }

    pub async fn append_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.execution.append_flow_data(key, value).await
    }

    pub async fn delete_flow_data(&self, key: &str) -> Result<()> {
        self.execution.delete_flow_data(key).await
    }

    pub async fn update_flow_data(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        self.execution
            .update_flow_data(change, key, value, emit)
            .await
    }

    // 事件

    /// 发出事件并携带当前层级标记
    pub async fn emit(&self, trigger: impl Into<Trigger>, value: Value) -> Result<()> {
        self.execution
            .emit_with(trigger.into(), value, self.layer_marks.clone())
            .await
    }

    pub async fn emit_with(
        &self,
        trigger: impl Into<Trigger>,
        value: Value,
        layer_marks: Vec<String>,
    ) -> Result<()> {
        self.execution
            .emit_with(trigger.into(), value, layer_marks)
            .await
    }

    // 运行时流

    pub fn put_into_stream(&self, item: Value) {
        self.execution.put_into_stream(item);
    }

    pub fn stop_stream(&self) {
        self.execution.stop_stream();
    }

    pub fn set_result(&self, value: Value) {
        self.execution.set_result(value);
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("trigger", &self.trigger)
            .field("value", &self.value)
            .field("execution", &self.execution.id())
            .field("layer_marks", &self.layer_marks)
            .finish()
    }
}
