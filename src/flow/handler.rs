use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::EventData;

/// 触发器处理函数
///
/// 结构体实现该 trait 即可作为处理函数注册；闭包请使用
/// [`Handler::new`]（异步）或 [`Handler::from_fn`]（同步）。
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// 用于日志与 chunk 触发器命名
    fn name(&self) -> &str {
        "handler"
    }

    async fn call(&self, data: EventData) -> Result<Value>;
}

/// 可注册的处理函数句柄，按 `Arc` 指针判定同一性
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn TriggerHandler>,
}

impl Handler {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_handler(FnHandler {
            name: "handler".to_string(),
            func: Box::new(move |data| Box::pin(func(data))),
        })
    }

    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(EventData) -> Result<Value> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(move |data| {
            let func = Arc::clone(&func);
            async move { func(data) }
        })
    }

    pub fn from_handler<H>(handler: H) -> Self
    where
        H: TriggerHandler + 'static,
    {
        Self {
            inner: Arc::new(handler),
        }
    }

    pub fn from_arc(handler: Arc<dyn TriggerHandler>) -> Self {
        Self { inner: handler }
    }

    /// 给闭包处理函数命名；对 trait 实现无效
    pub fn named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let inner = Arc::clone(&self.inner);
        Self::from_handler(Renamed { name, inner })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn call(&self, data: EventData) -> Result<Value> {
        self.inner.call(data).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name()).finish()
    }
}

type BoxedFn = Box<dyn Fn(EventData) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct FnHandler {
    name: String,
    func: BoxedFn,
}

#[async_trait]
impl TriggerHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, data: EventData) -> Result<Value> {
        (self.func)(data).await
    }
}

struct Renamed {
    name: String,
    inner: Arc<dyn TriggerHandler>,
}

#[async_trait]
impl TriggerHandler for Renamed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, data: EventData) -> Result<Value> {
        self.inner.call(data).await
    }
}
