// 运行时模块 - 执行实例、事件数据与汇合状态

mod event;
mod execution;
mod flow_data;
mod state;
mod stream;

pub use event::EventData;
pub use execution::{DataChange, Execution, ExecutionStatus};
pub use state::{
    barrier_key, BarrierStates, BatchState, CollectState, ForEachRecord, ForEachState, JoinState,
    MatchState,
};
pub use stream::RuntimeStream;

pub(crate) use flow_data::FlowData;
