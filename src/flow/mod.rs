// Flow 模块 - 蓝图、构建游标与触发流门面

pub(crate) mod block;
pub mod blueprint;
pub mod builder;
pub mod chunk;
pub mod conditions;
mod for_each;
pub mod handler;
mod match_case;
pub mod trigger_flow;
pub mod types;

// 重新导出核心类型
pub use blueprint::{BluePrint, BluePrintSnapshot, HandlerTable, HandlerTables};
pub use builder::Process;
pub use chunk::{Chunk, Step};
pub use conditions::{
    condition_always, condition_flow_data_equals, condition_from_fn,
    condition_runtime_data_equals, CaseCondition, CasePredicate,
};
pub use handler::{Handler, TriggerHandler};
pub use trigger_flow::TriggerFlow;
pub use types::{
    BatchOptions, CollectMode, ForEachOptions, JoinMode, MatchMode, StartOptions, Trigger,
    TriggerKind, START,
};
