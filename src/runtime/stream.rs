use futures::stream::{self, BoxStream, Stream};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 运行时流队列中的信号
#[derive(Debug, Clone)]
pub(crate) enum StreamSignal {
    Item(Value),
    Stop,
}

/// 执行实例的运行时输出流
///
/// 收到停止信号、发送端全部关闭或在空闲超时内没有新元素时结束。
/// 只提供异步的 `Stream` 形式，不提供同步迭代器。
pub struct RuntimeStream {
    execution_id: String,
    inner: BoxStream<'static, Value>,
}

impl RuntimeStream {
    pub(crate) fn new(
        execution_id: String,
        receiver: mpsc::UnboundedReceiver<StreamSignal>,
        timeout: Option<Duration>,
    ) -> Self {
        let id = execution_id.clone();
        let inner = stream::unfold(Some(receiver), move |receiver| {
            let id = id.clone();
            async move {
                let Some(mut receiver) = receiver else {
                    return None;
                };
                let next = match timeout {
                    Some(duration) => match tokio::time::timeout(duration, receiver.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(
                                execution = %id,
                                timeout_secs = duration.as_secs_f64(),
                                "runtime stream idle timeout"
                            );
                            return None;
                        }
                    },
                    None => receiver.recv().await,
                };
                match next {
                    Some(StreamSignal::Item(item)) => Some((item, Some(receiver))),
                    Some(StreamSignal::Stop) => {
                        debug!(execution = %id, "runtime stream stopped");
                        None
                    }
                    None => None,
                }
            }
        });
        Self {
            execution_id,
            inner: Box::pin(inner),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

impl Stream for RuntimeStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
