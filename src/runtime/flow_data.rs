use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::error::Result;
use crate::flow::types::{Trigger, TriggerKind};
use crate::state::DataStore;

use super::execution::{DataChange, Execution, ExecutionInner};

/// 跨执行实例共享的流程数据
///
/// 登记表只持有弱引用，已丢弃的执行实例在下一次登记或广播时被清理。
#[derive(Default)]
pub(crate) struct FlowData {
    store: DataStore,
    executions: RwLock<HashMap<String, Weak<ExecutionInner>>>,
}

impl FlowData {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, execution: &Execution) {
        let mut executions = self.executions.write();
        executions.retain(|_, weak| weak.strong_count() > 0);
        executions.insert(execution.id().to_string(), execution.downgrade());
    }

    pub fn remove(&self, id: &str) -> bool {
        self.executions.write().remove(id).is_some()
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        self.executions
            .read()
            .get(id)
            .and_then(Execution::upgrade)
    }

    pub fn live_count(&self) -> usize {
        let mut executions = self.executions.write();
        executions.retain(|_, weak| weak.strong_count() > 0);
        executions.len()
    }

    pub fn live_executions(&self) -> Vec<Execution> {
        let mut executions = self.executions.write();
        executions.retain(|_, weak| weak.strong_count() > 0);
        executions.values().filter_map(Execution::upgrade).collect()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.store.snapshot()
    }

    /// 修改流程数据，并向所有订阅了该键的执行实例广播新值
    pub async fn change(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        let Some(value) = change.apply(&self.store, key, value) else {
            return Ok(());
        };
        if !emit {
            return Ok(());
        }

        let subscribers: Vec<Execution> = self
            .live_executions()
            .into_iter()
            .filter(|execution| execution.has_handlers(TriggerKind::FlowData, key))
            .collect();

        let results = join_all(subscribers.iter().map(|execution| {
            execution.emit_with(Trigger::flow_data(key), value.clone(), Vec::new())
        }))
        .await;

        let mut first_error = None;
        for (execution, result) in subscribers.iter().zip(results) {
            if let Err(error) = result {
                warn!(execution = %execution.id(), key = %key, error = %error, "flow data handler failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
