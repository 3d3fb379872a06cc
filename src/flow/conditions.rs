use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::runtime::EventData;

/// 分支判断函数类型
pub type CasePredicate = Arc<dyn Fn(&EventData) -> bool + Send + Sync>;

/// `case` / `if_condition` 的判断条件：值相等或自定义判断函数
#[derive(Clone)]
pub enum CaseCondition {
    Equals(Value),
    Predicate(CasePredicate),
}

impl CaseCondition {
    pub fn equals(expected: impl Into<Value>) -> Self {
        CaseCondition::Equals(expected.into())
    }

    pub fn when<F>(func: F) -> Self
    where
        F: Fn(&EventData) -> bool + Send + Sync + 'static,
    {
        CaseCondition::Predicate(Arc::new(func))
    }

    pub fn matches(&self, data: &EventData) -> bool {
        match self {
            CaseCondition::Equals(expected) => data.value() == expected,
            CaseCondition::Predicate(predicate) => predicate(data),
        }
    }
}

impl fmt::Debug for CaseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseCondition::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            CaseCondition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Value> for CaseCondition {
    fn from(value: Value) -> Self {
        CaseCondition::Equals(value)
    }
}

impl From<&str> for CaseCondition {
    fn from(value: &str) -> Self {
        CaseCondition::Equals(Value::from(value))
    }
}

impl From<String> for CaseCondition {
    fn from(value: String) -> Self {
        CaseCondition::Equals(Value::from(value))
    }
}

impl From<i64> for CaseCondition {
    fn from(value: i64) -> Self {
        CaseCondition::Equals(Value::from(value))
    }
}

impl From<bool> for CaseCondition {
    fn from(value: bool) -> Self {
        CaseCondition::Equals(Value::from(value))
    }
}

/// 从函数创建判断条件
pub fn condition_from_fn<F>(func: F) -> CaseCondition
where
    F: Fn(&EventData) -> bool + Send + Sync + 'static,
{
    CaseCondition::when(func)
}

/// 总是为真的条件
pub fn condition_always() -> CaseCondition {
    CaseCondition::when(|_| true)
}

/// 运行时数据等于指定值的条件
pub fn condition_runtime_data_equals(key: impl Into<String>, expected: impl Into<Value>) -> CaseCondition {
    let key = key.into();
    let expected = expected.into();
    CaseCondition::when(move |data| data.get_runtime_data(&key).as_ref() == Some(&expected))
}

/// 流程数据等于指定值的条件
pub fn condition_flow_data_equals(key: impl Into<String>, expected: impl Into<Value>) -> CaseCondition {
    let key = key.into();
    let expected = expected.into();
    CaseCondition::when(move |data| data.get_flow_data(&key).as_ref() == Some(&expected))
}
