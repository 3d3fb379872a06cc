use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::flow::handler::{Handler, TriggerHandler};
use crate::flow::types::{new_mark, Trigger};
use crate::runtime::EventData;

/// Chunk：带名称的处理函数包装
///
/// 执行处理函数后，以 `Chunk[<handler>]-<name>` 为触发器把结果再次发出，
/// 并原样携带调用方的层级标记。
#[derive(Clone)]
pub struct Chunk {
    core: Arc<ChunkCore>,
    entry: Handler,
}

struct ChunkCore {
    name: String,
    trigger: String,
    handler: Handler,
}

impl Chunk {
    pub fn new(handler: Handler) -> Self {
        Self::named(new_mark(), handler)
    }

    pub fn named(name: impl Into<String>, handler: Handler) -> Self {
        let name = name.into();
        let trigger = format!("Chunk[{}]-{}", handler.name(), name);
        let core = Arc::new(ChunkCore {
            name,
            trigger,
            handler,
        });
        let entry = Handler::from_handler(ChunkEntry {
            core: Arc::clone(&core),
        });
        Self { core, entry }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn trigger_name(&self) -> &str {
        &self.core.trigger
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::event(self.core.trigger.clone())
    }

    pub fn handler(&self) -> &Handler {
        &self.core.handler
    }

    /// 注册到蓝图时使用的入口，同一 chunk 始终返回同一句柄
    pub(crate) fn entry(&self) -> &Handler {
        &self.entry
    }

    pub async fn call(&self, data: EventData) -> Result<Value> {
        self.core.call(data).await
    }
}

impl ChunkCore {
    async fn call(&self, data: EventData) -> Result<Value> {
        let execution = data.execution().clone();
        let marks = data.layer_marks().to_vec();
        let result = self.handler.call(data).await?;
        execution
            .emit_with(Trigger::event(self.trigger.clone()), result.clone(), marks)
            .await?;
        Ok(result)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("name", &self.core.name)
            .field("trigger", &self.core.trigger)
            .finish()
    }
}

struct ChunkEntry {
    core: Arc<ChunkCore>,
}

#[async_trait]
impl TriggerHandler for ChunkEntry {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn call(&self, data: EventData) -> Result<Value> {
        self.core.call(data).await
    }
}

/// `to` / `side_branch` / `batch` 可接受的步骤
#[derive(Clone, Debug)]
pub enum Step {
    Chunk(Chunk),
    Handler(Handler),
}

impl Step {
    pub(crate) fn into_chunk(self) -> Chunk {
        match self {
            Step::Chunk(chunk) => chunk,
            Step::Handler(handler) => Chunk::new(handler),
        }
    }
}

impl From<Chunk> for Step {
    fn from(chunk: Chunk) -> Self {
        Step::Chunk(chunk)
    }
}

impl From<&Chunk> for Step {
    fn from(chunk: &Chunk) -> Self {
        Step::Chunk(chunk.clone())
    }
}

impl From<Handler> for Step {
    fn from(handler: Handler) -> Self {
        Step::Handler(handler)
    }
}
