use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::flow::chunk::Chunk;
use crate::flow::handler::Handler;
use crate::flow::trigger_flow::TriggerFlow;
use crate::flow::types::{unique_name, TriggerKind};
use crate::runtime::Execution;

/// 单一类型下的处理函数表：触发器名称 -> (处理函数 ID -> 处理函数)
pub type HandlerTable = HashMap<String, HashMap<String, Handler>>;

/// 三类触发器的处理函数表快照，执行实例独占一份
#[derive(Clone, Default)]
pub struct HandlerTables {
    event: HandlerTable,
    flow_data: HandlerTable,
    runtime_data: HandlerTable,
}

impl HandlerTables {
    pub fn table(&self, kind: TriggerKind) -> &HandlerTable {
        match kind {
            TriggerKind::Event => &self.event,
            TriggerKind::FlowData => &self.flow_data,
            TriggerKind::RuntimeData => &self.runtime_data,
        }
    }

    fn table_mut(&mut self, kind: TriggerKind) -> &mut HandlerTable {
        match kind {
            TriggerKind::Event => &mut self.event,
            TriggerKind::FlowData => &mut self.flow_data,
            TriggerKind::RuntimeData => &mut self.runtime_data,
        }
    }

    /// 返回某触发器上注册的 (ID, 处理函数) 列表
    pub fn handlers(&self, kind: TriggerKind, name: &str) -> Vec<(String, Handler)> {
        self.table(kind)
            .get(name)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|(id, handler)| (id.clone(), handler.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_handlers(&self, kind: TriggerKind, name: &str) -> bool {
        self.table(kind)
            .get(name)
            .map(|handlers| !handlers.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Clone, Default)]
struct BluePrintState {
    handlers: HandlerTables,
    chunks: HashMap<String, Chunk>,
    collections: HashMap<String, BTreeSet<String>>,
}

/// 蓝图：触发器到处理函数的静态注册表
///
/// 克隆得到的是同一份蓝图的句柄；需要派生变体时使用 [`BluePrint::copy`]。
#[derive(Clone)]
pub struct BluePrint {
    name: Arc<str>,
    state: Arc<RwLock<BluePrintState>>,
}

/// 创建执行实例时取得的蓝图快照
#[derive(Clone, Default)]
pub struct BluePrintSnapshot {
    pub handlers: HandlerTables,
    pub collections: HashMap<String, BTreeSet<String>>,
}

impl BluePrint {
    pub fn new() -> Self {
        Self::with_name(unique_name("BluePrint"))
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(RwLock::new(BluePrintState::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册处理函数，重复注册同一处理函数时返回已有 ID
    pub fn add_handler(
        &self,
        kind: TriggerKind,
        name: &str,
        handler: Handler,
        id: Option<String>,
    ) -> String {
        let mut state = self.state.write();
        let handlers = state
            .handlers
            .table_mut(kind)
            .entry(name.to_string())
            .or_default();
        if let Some((existing, _)) = handlers.iter().find(|(_, stored)| stored.ptr_eq(&handler)) {
            return existing.clone();
        }
        let handler_id = id.unwrap_or_else(|| unique_name(&format!("Handler<{}>", handler.name())));
        handlers.insert(handler_id.clone(), handler);
        handler_id
    }

    pub fn add_event_handler(&self, event: &str, handler: Handler) -> String {
        self.add_handler(TriggerKind::Event, event, handler, None)
    }

    pub fn add_flow_data_handler(&self, key: &str, handler: Handler) -> String {
        self.add_handler(TriggerKind::FlowData, key, handler, None)
    }

    pub fn add_runtime_data_handler(&self, key: &str, handler: Handler) -> String {
        self.add_handler(TriggerKind::RuntimeData, key, handler, None)
    }

    /// 按 ID 移除，返回被移除的处理函数
    pub fn remove_handler(&self, kind: TriggerKind, name: &str, id: &str) -> Option<Handler> {
        let mut state = self.state.write();
        state
            .handlers
            .table_mut(kind)
            .get_mut(name)
            .and_then(|handlers| handlers.remove(id))
    }

    /// 按处理函数同一性移除，返回被移除的 ID
    pub fn remove_handler_instance(
        &self,
        kind: TriggerKind,
        name: &str,
        handler: &Handler,
    ) -> Option<String> {
        let mut state = self.state.write();
        let handlers = state.handlers.table_mut(kind).get_mut(name)?;
        let id = handlers
            .iter()
            .find(|(_, stored)| stored.ptr_eq(handler))
            .map(|(id, _)| id.clone())?;
        handlers.remove(&id);
        Some(id)
    }

    pub fn remove_all(&self, kind: TriggerKind, name: &str) {
        let mut state = self.state.write();
        if let Some(handlers) = state.handlers.table_mut(kind).get_mut(name) {
            handlers.clear();
        }
    }

    pub fn handler_count(&self, kind: TriggerKind, name: &str) -> usize {
        self.state
            .read()
            .handlers
            .table(kind)
            .get(name)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn triggers(&self, kind: TriggerKind) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .handlers
            .table(kind)
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn register_chunk(&self, chunk: Chunk) {
        self.state
            .write()
            .chunks
            .insert(chunk.name().to_string(), chunk);
    }

    pub fn chunk(&self, name: &str) -> Option<Chunk> {
        self.state.read().chunks.get(name).cloned()
    }

    pub fn chunk_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().chunks.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn register_collect_branch(&self, collection: &str, branch_id: &str) {
        self.state
            .write()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(branch_id.to_string());
    }

    /// 每个触发器单独复制一份，执行实例之间互不影响
    pub fn snapshot(&self) -> BluePrintSnapshot {
        let state = self.state.read();
        BluePrintSnapshot {
            handlers: state.handlers.clone(),
            collections: state.collections.clone(),
        }
    }

    /// 以当前快照创建执行实例，并登记到流程的存活实例表
    pub fn create_execution(
        &self,
        flow: &TriggerFlow,
        id: Option<String>,
        skip_exceptions: bool,
    ) -> Execution {
        let execution = Execution::new(
            self.snapshot(),
            Arc::clone(flow.flow_data()),
            flow.config(),
            id,
            skip_exceptions,
        );
        flow.flow_data().register(&execution);
        execution
    }

    /// 深拷贝出独立的蓝图变体
    pub fn copy(&self, name: Option<String>) -> BluePrint {
        let state = self.state.read().clone();
        BluePrint {
            name: Arc::from(name.unwrap_or_else(|| unique_name("BluePrint"))),
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn ptr_eq(&self, other: &BluePrint) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for BluePrint {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BluePrint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("BluePrint")
            .field("name", &self.name)
            .field("event_triggers", &state.handlers.event.len())
            .field("flow_data_triggers", &state.handlers.flow_data.len())
            .field("runtime_data_triggers", &state.handlers.runtime_data.len())
            .field("chunks", &state.chunks.len())
            .finish()
    }
}
