use futures::future::{join_all, try_join_all};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::FlowConfig;
use crate::error::{Result, TriggerFlowError};
use crate::flow::blueprint::BluePrintSnapshot;
use crate::flow::types::{new_mark, Trigger, TriggerKind};
use crate::state::DataStore;

use super::event::EventData;
use super::flow_data::FlowData;
use super::state::BarrierStates;
use super::stream::{RuntimeStream, StreamSignal};

/// 数据修改操作
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataChange {
    Set,
    Append,
    Delete,
}

impl DataChange {
    /// 执行修改并返回需要广播的新值；删除不存在的键时返回 `None`
    pub(crate) fn apply(self, store: &DataStore, key: &str, value: Value) -> Option<Value> {
        match self {
            DataChange::Set => Some(store.set(key, value)),
            DataChange::Append => Some(store.append(key, value)),
            DataChange::Delete => store.delete(key).map(|_| Value::Null),
        }
    }
}

/// 执行实例状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Created,
    Started,
}

const STATUS_CREATED: u8 = 0;
const STATUS_STARTED: u8 = 1;

/// 蓝图的一次运行实例
///
/// 克隆得到的是同一实例的句柄。
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecutionInner>,
}

pub(crate) struct ExecutionInner {
    id: String,
    snapshot: BluePrintSnapshot,
    flow_data: Arc<FlowData>,
    skip_exceptions: bool,
    show_event_log: bool,
    stream_timeout: Option<Duration>,
    runtime_data: DataStore,
    barriers: BarrierStates,
    status: AtomicU8,
    result: Mutex<Option<Value>>,
    result_ready: watch::Sender<bool>,
    stream_tx: mpsc::UnboundedSender<StreamSignal>,
    stream_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamSignal>>>,
}

impl Execution {
    pub(crate) fn new(
        snapshot: BluePrintSnapshot,
        flow_data: Arc<FlowData>,
        config: &FlowConfig,
        id: Option<String>,
        skip_exceptions: bool,
    ) -> Self {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (result_ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(ExecutionInner {
                id: id.unwrap_or_else(new_mark),
                snapshot,
                flow_data,
                skip_exceptions,
                show_event_log: config.show_event_log,
                stream_timeout: config.stream_timeout,
                runtime_data: DataStore::new(),
                barriers: BarrierStates::default(),
                status: AtomicU8::new(STATUS_CREATED),
                result: Mutex::new(None),
                result_ready,
                stream_tx,
                stream_rx: Mutex::new(Some(stream_rx)),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ExecutionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ExecutionInner>) -> Option<Execution> {
        weak.upgrade().map(|inner| Execution { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn skip_exceptions(&self) -> bool {
        self.inner.skip_exceptions
    }

    pub fn status(&self) -> ExecutionStatus {
        match self.inner.status.load(Ordering::Acquire) {
            STATUS_CREATED => ExecutionStatus::Created,
            _ => ExecutionStatus::Started,
        }
    }

    /// Created -> Started，只有第一次调用返回 `true`
    fn mark_started(&self) -> bool {
        self.inner
            .status
            .compare_exchange(
                STATUS_CREATED,
                STATUS_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn has_handlers(&self, kind: TriggerKind, name: &str) -> bool {
        self.inner.snapshot.handlers.has_handlers(kind, name)
    }

    pub(crate) fn barriers(&self) -> &BarrierStates {
        &self.inner.barriers
    }

    pub(crate) fn collect_branches(&self, collection: &str) -> BTreeSet<String> {
        self.inner
            .snapshot
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    // 事件分发

    pub async fn emit(&self, trigger: impl Into<Trigger>, value: Value) -> Result<()> {
        self.emit_with(trigger.into(), value, Vec::new()).await
    }

    /// 为每个匹配的处理函数启动一个并发任务并等待全部完成
    ///
    /// `skip_exceptions` 为假时返回第一个失败；其余已启动的任务会继续运行到结束。
    pub async fn emit_with(
        &self,
        trigger: Trigger,
        value: Value,
        layer_marks: Vec<String>,
    ) -> Result<()> {
        let handlers = self
            .inner
            .snapshot
            .handlers
            .handlers(trigger.kind, &trigger.name);

        if self.inner.show_event_log {
            info!(execution = %self.id(), trigger = %trigger, handlers = handlers.len(), value = %value, "trigger flow event");
        } else {
            debug!(execution = %self.id(), trigger = %trigger, handlers = handlers.len(), "trigger flow event");
        }

        if handlers.is_empty() {
            return Ok(());
        }

        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|(handler_id, handler)| {
                let data = EventData::new(
                    trigger.clone(),
                    value.clone(),
                    self.clone(),
                    layer_marks.clone(),
                );
                let task = tokio::spawn(async move { handler.call(data).await });
                (handler_id, task)
            })
            .collect();

        let joined = tasks.into_iter().map(|(handler_id, task)| {
            let trigger_name = trigger.name.clone();
            async move {
                match task.await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(error)) => Err((handler_id, error)),
                    Err(join_error) => Err((
                        handler_id.clone(),
                        TriggerFlowError::HandlerFailed {
                            trigger: trigger_name,
                            handler: handler_id,
                            message: join_error.to_string(),
                        },
                    )),
                }
            }
        });

        if self.inner.skip_exceptions {
            for result in join_all(joined).await {
                if let Err((handler_id, error)) = result {
                    warn!(
                        execution = %self.id(),
                        trigger = %trigger,
                        handler = %handler_id,
                        error = %error,
                        "handler failed, skipped"
                    );
                }
            }
            Ok(())
        } else {
            try_join_all(joined).await.map_err(|(handler_id, error)| {
                error!(
                    execution = %self.id(),
                    trigger = %trigger,
                    handler = %handler_id,
                    error = %error,
                    "handler failed"
                );
                error
            })?;
            Ok(())
        }
    }

    // 运行时数据

    pub fn get_runtime_data(&self, key: &str) -> Option<Value> {
        self.inner.runtime_data.get(key)
    }

    pub fn runtime_data_snapshot(&self) -> serde_json::Map<String, Value> {
        self.inner.runtime_data.snapshot()
    }

    pub async fn set_runtime_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_runtime_data(DataChange::Set, key, value, true)
            .await
    }

    pub async fn append_runtime_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_runtime_data(DataChange::Append, key, value, true)
            .await
    }

    pub async fn delete_runtime_data(&self, key: &str) -> Result<()> {
        self.update_runtime_data(DataChange::Delete, key, Value::Null, true)
            .await
    }

    /// 修改运行时数据；`emit` 为真且有订阅者时以 RuntimeData 类型重新发出新值
    pub async fn update_runtime_data(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        let Some(value) = change.apply(&self.inner.runtime_data, key, value) else {
            return Ok(());
        };
        if emit && self.has_handlers(TriggerKind::RuntimeData, key) {
            self.emit_with(Trigger::runtime_data(key), value, Vec::new())
                .await?;
        }
        Ok(())
    }

    // 流程共享数据

    pub fn get_flow_data(&self, key: &str) -> Option<Value> {
        self.inner.flow_data.get(key)
    }

    pub async fn set_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_flow_data(DataChange::Set, key, value, true).await
    }

    pub async fn append_flow_data(&self, key: &str, value: Value) -> Result<()> {
        self.update_flow_data(DataChange::Append, key, value, true)
            .await
    }

    pub async fn delete_flow_data(&self, key: &str) -> Result<()> {
        self.update_flow_data(DataChange::Delete, key, Value::Null, true)
            .await
    }

    pub async fn update_flow_data(
        &self,
        change: DataChange,
        key: &str,
        value: Value,
        emit: bool,
    ) -> Result<()> {
        self.inner.flow_data.change(change, key, value, emit).await
    }

    // 启动

    /// 发出 `START` 事件并等待本轮分发完成
    ///
    /// 每个实例只能启动一次，运行时流的首次拉取也算作启动。
    pub async fn start(&self, initial_value: Value) -> Result<()> {
        if !self.mark_started() {
            return Err(TriggerFlowError::AlreadyStarted(self.id().to_string()));
        }
        self.emit(Trigger::start(), initial_value).await
    }

    /// 启动并等待结果
    ///
    /// 结果就绪即返回，不等待其余分支结束；超时只记录警告并返回 `None`。
    pub async fn start_and_wait(
        &self,
        initial_value: Value,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let execution = self.clone();
        let mut dispatch = tokio::spawn(async move { execution.start(initial_value).await });
        let ready = self.inner.result_ready.subscribe();

        let wait = async {
            let mut dispatched = false;
            let ready_signal = wait_ready(ready);
            tokio::pin!(ready_signal);
            loop {
                tokio::select! {
                    _ = &mut ready_signal => return Ok(self.result()),
                    joined = &mut dispatch, if !dispatched => {
                        dispatched = true;
                        match joined {
                            Ok(Ok(())) => continue,
                            Ok(Err(error)) => return Err(error),
                            Err(join_error) => return Err(TriggerFlowError::Other(join_error.into())),
                        }
                    }
                }
            }
        };

        match timeout {
            None => wait.await,
            Some(duration) => match tokio::time::timeout(duration, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        execution = %self.id(),
                        timeout_secs = duration.as_secs_f64(),
                        "execution result not ready before timeout"
                    );
                    Ok(None)
                }
            },
        }
    }

    // 结果

    /// 写入结果并发出就绪信号
    pub fn set_result(&self, value: Value) {
        *self.inner.result.lock() = Some(value);
        self.inner.result_ready.send_replace(true);
    }

    /// 仅在尚无结果时写入，然后发出就绪信号
    pub(crate) fn set_default_result(&self, value: Value) {
        {
            let mut result = self.inner.result.lock();
            if result.is_none() {
                *result = Some(value);
            }
        }
        self.inner.result_ready.send_replace(true);
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.result.lock().clone()
    }

    pub fn is_result_ready(&self) -> bool {
        *self.inner.result_ready.borrow()
    }

    /// 等待结果；超时只记录警告并返回 `None`
    pub async fn get_result(&self, timeout: Option<Duration>) -> Option<Value> {
        let ready = wait_ready(self.inner.result_ready.subscribe());
        match timeout {
            None => ready.await,
            Some(duration) => {
                if tokio::time::timeout(duration, ready).await.is_err() {
                    warn!(
                        execution = %self.id(),
                        timeout_secs = duration.as_secs_f64(),
                        "execution result not ready before timeout"
                    );
                    return None;
                }
            }
        }
        self.result()
    }

    // 运行时流

    pub fn put_into_stream(&self, item: Value) {
        if self.inner.stream_tx.send(StreamSignal::Item(item)).is_err() {
            warn!(execution = %self.id(), "runtime stream closed before item could be enqueued");
        }
    }

    pub fn stop_stream(&self) {
        let _ = self.inner.stream_tx.send(StreamSignal::Stop);
    }

    /// 取得运行时流，使用配置中的空闲超时
    pub fn runtime_stream(&self, initial_value: Value) -> Result<RuntimeStream> {
        self.runtime_stream_with_timeout(initial_value, self.inner.stream_timeout)
    }

    /// 取得运行时流
    ///
    /// 每个执行实例只能取得一次。若实例仍处于 `Created` 状态，拉取流会在后台
    /// 启动它且只启动一次。
    pub fn runtime_stream_with_timeout(
        &self,
        initial_value: Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeStream> {
        let receiver = self
            .inner
            .stream_rx
            .lock()
            .take()
            .ok_or_else(|| TriggerFlowError::StreamAlreadyTaken(self.id().to_string()))?;

        if self.mark_started() {
            let execution = self.clone();
            tokio::spawn(async move {
                if let Err(error) = execution.emit(Trigger::start(), initial_value).await {
                    error!(execution = %execution.id(), error = %error, "execution started by runtime stream failed");
                }
            });
        }

        Ok(RuntimeStream::new(self.id().to_string(), receiver, timeout))
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("skip_exceptions", &self.inner.skip_exceptions)
            .finish()
    }
}

async fn wait_ready(mut ready: watch::Receiver<bool>) {
    loop {
        if *ready.borrow_and_update() {
            return;
        }
        if ready.changed().await.is_err() {
            return;
        }
    }
}
