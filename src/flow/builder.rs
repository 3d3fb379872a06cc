use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TriggerFlowError};
use crate::flow::block::BlockData;
use crate::flow::blueprint::BluePrint;
use crate::flow::chunk::{Chunk, Step};
use crate::flow::handler::Handler;
use crate::flow::types::{new_mark, BatchOptions, CollectMode, JoinMode, Trigger};
use crate::runtime::{barrier_key, BatchState, EventData};

/// 流程构建游标
///
/// 每个方法都把处理函数登记到蓝图，并返回指向下一个触发器的新游标；
/// 游标本身不可变，可以随意克隆和分叉。
#[derive(Clone)]
pub struct Process {
    pub(crate) trigger: Trigger,
    pub(crate) blue_print: BluePrint,
    pub(crate) block: Arc<BlockData>,
}

impl Process {
    pub(crate) fn new(trigger: Trigger, blue_print: BluePrint, block: Arc<BlockData>) -> Self {
        Self {
            trigger,
            blue_print,
            block,
        }
    }

    pub(crate) fn root(trigger: Trigger, blue_print: BluePrint) -> Self {
        Self::new(trigger, blue_print, BlockData::root())
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn blue_print(&self) -> &BluePrint {
        &self.blue_print
    }

    /// 同一作用域内移动到另一个触发器
    pub(crate) fn at(&self, trigger: Trigger) -> Process {
        Process::new(trigger, self.blue_print.clone(), Arc::clone(&self.block))
    }

    pub(crate) fn register(&self, handler: Handler) -> String {
        self.blue_print
            .add_handler(self.trigger.kind, &self.trigger.name, handler, None)
    }

    pub fn when(&self, trigger: impl Into<Trigger>) -> Process {
        Process::root(trigger.into(), self.blue_print.clone())
    }

    /// 等待多个触发器汇合
    pub fn when_all<I, T>(&self, triggers: I, mode: JoinMode) -> Result<Process>
    where
        I: IntoIterator<Item = T>,
        T: Into<Trigger>,
    {
        let triggers: Vec<Trigger> = triggers.into_iter().map(Into::into).collect();
        if triggers.is_empty() {
            return Err(TriggerFlowError::invalid_construct(
                "when_all",
                "no trigger to wait for",
            ));
        }
        let join_id = new_mark();
        let when_trigger = format!("When-{}", join_id);
        let expected: Arc<Vec<String>> =
            Arc::new(triggers.iter().map(|trigger| trigger.name.clone()).collect());

        let emit_to = when_trigger.clone();
        let join = Handler::new(move |data: EventData| {
            let key = barrier_key(&join_id, None);
            let expected = Arc::clone(&expected);
            let when_trigger = emit_to.clone();
            async move {
                let output = {
                    let mut joins = data.execution().barriers().joins.lock().await;
                    let state = joins.entry(key).or_default();
                    match mode {
                        JoinMode::And => {
                            state.record_all(&expected, data.trigger_name(), data.value().clone())
                        }
                        JoinMode::Or => state.record_first().then(|| {
                            json!({
                                "kind": data.trigger_kind().as_str(),
                                "trigger": data.trigger_name(),
                                "value": data.value().clone(),
                            })
                        }),
                        JoinMode::SimpleOr => state.record_first().then(|| data.value().clone()),
                    }
                };
                if let Some(output) = output {
                    data.emit(when_trigger, output).await?;
                }
                Ok(Value::Null)
            }
        })
        .named("when_all");

        for trigger in &triggers {
            self.blue_print
                .add_handler(trigger.kind, &trigger.name, join.clone(), None);
        }

        Ok(Process::root(Trigger::event(when_trigger), self.blue_print.clone()))
    }

    /// 接到下一个步骤，游标移动到该 chunk 的完成触发器
    pub fn to(&self, step: impl Into<Step>) -> Process {
        let chunk = step.into().into_chunk();
        self.register(chunk.entry().clone());
        self.at(chunk.trigger())
    }

    /// 使用蓝图中已登记的具名 chunk
    pub fn to_named(&self, name: &str) -> Result<Process> {
        let chunk = self
            .blue_print
            .chunk(name)
            .ok_or_else(|| TriggerFlowError::UnknownChunk(name.to_string()))?;
        Ok(self.to(chunk))
    }

    /// 挂一个旁路步骤，游标留在原触发器
    pub fn side_branch(&self, step: impl Into<Step>) -> Process {
        let chunk = step.into().into_chunk();
        self.register(chunk.entry().clone());
        self.clone()
    }

    pub fn batch<I, S>(&self, steps: I) -> Process
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.batch_with(steps, BatchOptions::default())
    }

    /// 并行分发到多个 chunk，全部完成后以 `{chunk 名称: 结果}` 触发一次
    pub fn batch_with<I, S>(&self, steps: I, options: BatchOptions) -> Process
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        let batch_id = new_mark();
        let batch_trigger = format!("Batch-{}", batch_id);

        let chunks: Vec<Chunk> = steps
            .into_iter()
            .map(|step| step.into().into_chunk())
            .map(|chunk| match options.concurrency {
                Some(limit) => limit_chunk(&chunk, &batch_id, limit),
                None => chunk,
            })
            .collect();

        let names: Arc<HashMap<String, String>> = Arc::new(
            chunks
                .iter()
                .map(|chunk| (chunk.trigger_name().to_string(), chunk.name().to_string()))
                .collect(),
        );

        let emit_to = batch_trigger.clone();
        let wait_all = Handler::new(move |data: EventData| {
            let key = barrier_key(&batch_id, data.layer_mark());
            let names = Arc::clone(&names);
            let batch_trigger = emit_to.clone();
            async move {
                let Some(name) = names.get(data.trigger_name()) else {
                    return Ok(Value::Null);
                };
                let output = {
                    let mut batches = data.execution().barriers().batches.lock().await;
                    let state = batches
                        .entry(key.clone())
                        .or_insert_with(|| BatchState::new(names.values().cloned()));
                    let output = state.record(name, data.value().clone());
                    if output.is_some() {
                        batches.remove(&key);
                    }
                    output
                };
                if let Some(output) = output {
                    data.emit(batch_trigger, output).await?;
                }
                Ok(Value::Null)
            }
        })
        .named("batch");

        for chunk in &chunks {
            self.register(chunk.entry().clone());
            self.blue_print
                .add_event_handler(chunk.trigger_name(), wait_all.clone());
        }

        if options.side_branch {
            self.clone()
        } else {
            self.at(Trigger::event(batch_trigger))
        }
    }

    /// 具名多生产者汇合点
    ///
    /// 同名的所有 collect 调用共享一组槽位；每个分支用 `branch_id` 标识。
    pub fn collect(&self, name: &str, branch_id: Option<&str>, mode: CollectMode) -> Process {
        let branch_id = branch_id.map(str::to_string).unwrap_or_else(new_mark);
        self.blue_print.register_collect_branch(name, &branch_id);

        let collection = name.to_string();
        let collect_trigger = format!("Collect-{}", name);
        let emit_to = collect_trigger.clone();
        let fill = Handler::new(move |data: EventData| {
            let collection = collection.clone();
            let branch_id = branch_id.clone();
            let collect_trigger = emit_to.clone();
            async move {
                let expected = data.execution().collect_branches(&collection);
                let key = barrier_key(&collection, data.layer_mark());
                let output = {
                    let mut collections = data.execution().barriers().collections.lock().await;
                    collections.entry(key).or_default().record(
                        &expected,
                        &branch_id,
                        data.value().clone(),
                        mode,
                    )
                };
                if let Some(output) = output {
                    data.emit(collect_trigger, output).await?;
                }
                Ok(Value::Null)
            }
        })
        .named("collect");

        self.register(fill);
        self.at(Trigger::event(collect_trigger))
    }

    /// 以当前值作为结果（已有结果时保留原值），并发出就绪信号
    pub fn end(&self) -> Process {
        let set_default_result = Handler::from_fn(|data: EventData| {
            data.execution().set_default_result(data.value().clone());
            Ok(Value::Null)
        })
        .named("end");
        self.register(set_default_result);
        self.clone()
    }
}

/// 让 chunk 在执行处理函数时占用批次信号量；下游发出事件时不再占用
fn limit_chunk(chunk: &Chunk, batch_id: &str, limit: usize) -> Chunk {
    let inner = chunk.handler().clone();
    let key = format!("Batch-{}", batch_id);
    let limited = Handler::new(move |data: EventData| {
        let inner = inner.clone();
        let key = key.clone();
        async move {
            let semaphore = data.execution().barriers().semaphore(&key, limit);
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|error| TriggerFlowError::Other(error.into()))?;
            inner.call(data).await
        }
    })
    .named(chunk.handler().name());
    Chunk::named(chunk.name(), limited)
}
