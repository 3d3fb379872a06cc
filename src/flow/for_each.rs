use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{Result, TriggerFlowError};
use crate::flow::block::{BlockData, BlockKind, ForEachScope};
use crate::flow::builder::Process;
use crate::flow::handler::Handler;
use crate::flow::types::{new_mark, ForEachOptions, Trigger};
use crate::runtime::{barrier_key, EventData, ForEachRecord, ForEachState};

enum Arrival {
    Passthrough,
    Pending,
    UnknownItem,
    Complete(Vec<Value>),
}

impl Process {
    pub fn for_each(&self) -> Process {
        self.for_each_with(ForEachOptions::default())
    }

    /// 对数组中的每个元素分别分发一次事件
    ///
    /// 每个元素压入两层标记：实例标记和元素标记。非数组值按单个元素处理。
    pub fn for_each_with(&self, options: ForEachOptions) -> Process {
        let for_each_id = new_mark();
        let send_trigger = format!("ForEach-{}-Send", for_each_id);
        let end_trigger = format!("ForEach-{}-End", for_each_id);

        let scope_id = for_each_id.clone();
        let send_to = send_trigger.clone();
        let end_to = end_trigger.clone();
        let send_items = Handler::new(move |data: EventData| {
            let for_each_id = scope_id.clone();
            let send_trigger = send_to.clone();
            let end_trigger = end_to.clone();
            let options = options.clone();
            async move {
                let mut data = data;
                let instance = data.layer_in();
                let items = match data.value() {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };

                if items.is_empty() {
                    data.layer_out();
                    data.emit(end_trigger, json!([])).await?;
                    return Ok(Value::Null);
                }

                let item_marks: Vec<String> = items.iter().map(|_| new_mark()).collect();
                {
                    let mut states = data.execution().barriers().for_each.lock().await;
                    states.insert(
                        barrier_key(&for_each_id, Some(&instance)),
                        ForEachState::new(item_marks.clone()),
                    );
                }

                // 限流时每个元素的分发占用一个许可，直到其下游处理完毕
                let semaphore = options
                    .concurrency
                    .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
                let sends = items
                    .into_iter()
                    .zip(item_marks)
                    .enumerate()
                    .map(|(index, (item, item_mark))| {
                        let execution = data.execution().clone();
                        let semaphore = semaphore.clone();
                        let trigger = Trigger::event(send_trigger.clone());
                        let mut marks = data.layer_marks().to_vec();
                        marks.push(item_mark);
                        let payload = if options.with_index {
                            json!([index, item])
                        } else {
                            item
                        };
                        async move {
                            let _permit = match semaphore {
                                Some(semaphore) => match semaphore.acquire_owned().await {
                                    Ok(permit) => Some(permit),
                                    Err(error) => return Err(TriggerFlowError::Other(error.into())),
                                },
                                None => None,
                            };
                            execution.emit_with(trigger, payload, marks).await
                        }
                    });

                try_join_all(sends).await?;
                Ok(Value::Null)
            }
        })
        .named("for_each");

        self.register(send_items);

        let block = BlockData::nested(
            BlockKind::ForEach(ForEachScope {
                id: for_each_id,
                end_trigger,
            }),
            &self.block,
        );
        Process::new(
            Trigger::event(send_trigger),
            self.blue_print.clone(),
            block,
        )
    }

    pub fn end_for_each(&self) -> Result<Process> {
        self.end_for_each_sorted(false)
    }

    /// for_each 的汇合点
    ///
    /// 全部元素到达后弹出两层标记并发出结果列表：`sort_by_index` 为真时按输入顺序，
    /// 否则按到达顺序。不属于任何存活实例的事件按单元素列表直接透传。
    pub fn end_for_each_sorted(&self, sort_by_index: bool) -> Result<Process> {
        let scope = self.block.for_each_scope().ok_or_else(|| {
            TriggerFlowError::invalid_construct("end_for_each", "not inside a for_each block")
        })?;

        let for_each_id = scope.id.clone();
        let end_to = scope.end_trigger.clone();
        let collect_results = Handler::new(move |data: EventData| {
            let for_each_id = for_each_id.clone();
            let end_trigger = end_to.clone();
            async move {
                let arrival = match (data.upper_layer_mark(), data.layer_mark()) {
                    (Some(instance), Some(item)) => {
                        let key = barrier_key(&for_each_id, Some(instance));
                        let mut states = data.execution().barriers().for_each.lock().await;
                        let record = states
                            .get_mut(&key)
                            .map(|state| state.record(item, data.value().clone(), sort_by_index));
                        match record {
                            None => Arrival::Passthrough,
                            Some(ForEachRecord::Pending) => Arrival::Pending,
                            Some(ForEachRecord::UnknownItem) => Arrival::UnknownItem,
                            Some(ForEachRecord::Complete(values)) => {
                                states.remove(&key);
                                Arrival::Complete(values)
                            }
                        }
                    }
                    _ => Arrival::Passthrough,
                };

                match arrival {
                    Arrival::Passthrough => {
                        data.emit(end_trigger, json!([data.value().clone()])).await?;
                    }
                    Arrival::Pending => {}
                    Arrival::UnknownItem => {
                        return Err(TriggerFlowError::contract_violation(
                            end_trigger,
                            format!(
                                "item mark `{}` is not a slot of its for_each instance",
                                data.layer_mark().unwrap_or_default()
                            ),
                        ));
                    }
                    Arrival::Complete(values) => {
                        let mut marks = data.layer_marks().to_vec();
                        marks.truncate(marks.len().saturating_sub(2));
                        data.emit_with(end_trigger, Value::Array(values), marks)
                            .await?;
                    }
                }
                Ok(Value::Null)
            }
        })
        .named("end_for_each");

        self.register(collect_results);

        Ok(Process::new(
            Trigger::event(scope.end_trigger.clone()),
            self.blue_print.clone(),
            self.block.exit(),
        ))
    }
}
