pub mod config;
pub mod error;
pub mod flow;
pub mod runtime;
pub mod state;
pub mod utils;

pub use config::{EnvConfig, FlowConfig};
pub use error::{Result, TriggerFlowError};
pub use flow::{
    condition_always, condition_flow_data_equals, condition_from_fn,
    condition_runtime_data_equals, BatchOptions, BluePrint, CaseCondition, Chunk, CollectMode,
    ForEachOptions, Handler, JoinMode, MatchMode, Process, StartOptions, Step, Trigger,
    TriggerFlow, TriggerHandler, TriggerKind, START,
};
pub use runtime::{DataChange, EventData, Execution, ExecutionStatus, RuntimeStream};
pub use state::DataStore;
pub use utils::logging;
