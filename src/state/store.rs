use parking_lot::RwLock;
use serde_json::{Map, Value};

/// 键值数据存储
///
/// 键支持点号路径：`"user.name"` 会读写嵌套对象 `{"user": {"name": ...}}`。
/// 读写锁只在单次操作内持有，不会跨越 `.await`。
#[derive(Default)]
pub struct DataStore {
    inner: RwLock<Map<String, Value>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Map::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.read();
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = inner.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 写入并返回写入后的值
    pub fn set(&self, key: &str, value: Value) -> Value {
        let mut inner = self.inner.write();
        *slot_mut(&mut inner, key) = value.clone();
        value
    }

    /// 追加到列表：不存在时新建列表，非列表值先包装成单元素列表
    pub fn append(&self, key: &str, value: Value) -> Value {
        self.extend(key, std::iter::once(value))
    }

    pub fn extend<I>(&self, key: &str, values: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        let mut inner = self.inner.write();
        let slot = slot_mut(&mut inner, key);
        let mut items = match slot.take() {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        };
        items.extend(values);
        *slot = Value::Array(items);
        slot.clone()
    }

    /// 删除键，返回被删除的值；键不存在时返回 `None`
    pub fn delete(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.write();
        match key.rsplit_once('.') {
            None => inner.remove(key),
            Some((parent, last)) => {
                let mut parts = parent.split('.');
                let first = parts.next()?;
                let mut current = inner.get_mut(first)?;
                for part in parts {
                    current = current.as_object_mut()?.get_mut(part)?;
                }
                current.as_object_mut()?.remove(last)
            }
        }
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().clone()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// 按点号路径定位可写槽位，沿途缺失或非对象的节点会被替换为空对象
fn slot_mut<'a>(root: &'a mut Map<String, Value>, key: &str) -> &'a mut Value {
    let mut parts = key.split('.');
    let first = parts.next().unwrap_or_default();
    let mut current = root.entry(first.to_string()).or_insert(Value::Null);
    for part in parts {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(part.to_string()).or_insert(Value::Null),
            _ => unreachable!("slot was just replaced with an object"),
        };
    }
    current
}
