use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::flow::types::CollectMode;

/// 运行时汇合状态
///
/// 每个执行实例独占一份；同一类屏障共享一把锁，锁只覆盖
/// “读取-累加-判断”这一步，向下游发出事件前释放。
#[derive(Default)]
pub struct BarrierStates {
    pub for_each: Mutex<HashMap<String, ForEachState>>,
    pub matches: Mutex<HashMap<String, MatchState>>,
    pub batches: Mutex<HashMap<String, BatchState>>,
    pub collections: Mutex<HashMap<String, CollectState>>,
    pub joins: Mutex<HashMap<String, JoinState>>,
    semaphores: parking_lot::Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl BarrierStates {
    /// 同一个键在一个执行实例内共享同一个信号量
    pub fn semaphore(&self, key: &str, permits: usize) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock();
        Arc::clone(
            semaphores
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(permits.max(1)))),
        )
    }
}

/// 屏障键：构造 ID + 层级标记
pub fn barrier_key(id: &str, mark: Option<&str>) -> String {
    format!("{}::{}", id, mark.unwrap_or(""))
}

/// for_each 实例状态
pub struct ForEachState {
    slots: HashMap<String, usize>,
    results: Vec<Option<Value>>,
    arrivals: Vec<usize>,
}

/// 一次记录的结果
pub enum ForEachRecord {
    Pending,
    Complete(Vec<Value>),
    UnknownItem,
}

impl ForEachState {
    pub fn new(item_marks: Vec<String>) -> Self {
        let expected = item_marks.len();
        Self {
            slots: item_marks
                .into_iter()
                .enumerate()
                .map(|(index, mark)| (mark, index))
                .collect(),
            results: vec![None; expected],
            arrivals: Vec::with_capacity(expected),
        }
    }

    pub fn expected(&self) -> usize {
        self.results.len()
    }

    pub fn record(&mut self, item_mark: &str, value: Value, sort_by_index: bool) -> ForEachRecord {
        let Some(&index) = self.slots.get(item_mark) else {
            return ForEachRecord::UnknownItem;
        };
        if self.results[index].is_none() {
            self.arrivals.push(index);
        }
        self.results[index] = Some(value);

        if self.arrivals.len() < self.expected() {
            return ForEachRecord::Pending;
        }

        let ordered: Vec<usize> = if sort_by_index {
            (0..self.expected()).collect()
        } else {
            self.arrivals.clone()
        };
        ForEachRecord::Complete(
            ordered
                .into_iter()
                .map(|index| self.results[index].take().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// match(hit_all) 在某个父层级下的分支结果
pub struct MatchState {
    slots: Vec<(String, Option<Value>)>,
}

impl MatchState {
    /// `branch_marks` 按分支注册顺序排列
    pub fn new(branch_marks: Vec<String>) -> Self {
        Self {
            slots: branch_marks.into_iter().map(|mark| (mark, None)).collect(),
        }
    }

    pub fn contains(&self, branch_mark: &str) -> bool {
        self.slots.iter().any(|(mark, _)| mark == branch_mark)
    }

    pub fn record(&mut self, branch_mark: &str, value: Value) -> Option<Vec<Value>> {
        if let Some((_, slot)) = self.slots.iter_mut().find(|(mark, _)| mark == branch_mark) {
            *slot = Some(value);
        }
        if self.slots.iter().any(|(_, slot)| slot.is_none()) {
            return None;
        }
        Some(
            self.slots
                .iter_mut()
                .map(|(_, slot)| slot.take().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// batch 汇合状态，按 chunk 名称记录
pub struct BatchState {
    slots: BTreeMap<String, Option<Value>>,
}

impl BatchState {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            slots: names.into_iter().map(|name| (name, None)).collect(),
        }
    }

    pub fn record(&mut self, name: &str, value: Value) -> Option<Value> {
        if let Some(slot) = self.slots.get_mut(name) {
            *slot = Some(value);
        }
        if self.slots.values().any(Option::is_none) {
            return None;
        }
        let results: Map<String, Value> = self
            .slots
            .iter_mut()
            .map(|(name, slot)| (name.clone(), slot.take().unwrap_or(Value::Null)))
            .collect();
        Some(Value::Object(results))
    }
}

/// collect 汇合状态，按调用方指定的 branch_id 记录
#[derive(Default)]
pub struct CollectState {
    slots: BTreeMap<String, Option<Value>>,
}

impl CollectState {
    pub fn record(
        &mut self,
        expected: &BTreeSet<String>,
        branch_id: &str,
        value: Value,
        mode: CollectMode,
    ) -> Option<Value> {
        for branch in expected {
            self.slots.entry(branch.clone()).or_insert(None);
        }
        self.slots.insert(branch_id.to_string(), Some(value));

        if self.slots.values().any(Option::is_none) {
            return None;
        }

        let filled: Map<String, Value> = self
            .slots
            .iter()
            .map(|(branch, slot)| (branch.clone(), slot.clone().unwrap_or(Value::Null)))
            .collect();

        if mode == CollectMode::FilledThenEmpty {
            for slot in self.slots.values_mut() {
                *slot = None;
            }
        }
        Some(Value::Object(filled))
    }
}

/// when(...) 多触发器汇合状态
#[derive(Default)]
pub struct JoinState {
    values: BTreeMap<String, Option<Value>>,
    fired: bool,
}

impl JoinState {
    /// and 模式：所有槽位非空后触发；触发后不重置，后续每次更新都会再次触发
    pub fn record_all(&mut self, expected: &[String], name: &str, value: Value) -> Option<Value> {
        for trigger in expected {
            self.values.entry(trigger.clone()).or_insert(None);
        }
        self.values.insert(name.to_string(), Some(value));
        if self.values.values().any(Option::is_none) {
            return None;
        }
        self.fired = true;
        Some(Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.clone().unwrap_or(Value::Null)))
                .collect(),
        ))
    }

    /// or / simple_or 模式：只有第一个到达的触发器生效
    pub fn record_first(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn for_each_state_orders_by_arrival_or_index() {
        let marks = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let mut arrival = ForEachState::new(marks.clone());
        assert!(matches!(arrival.record("c", json!(3), false), ForEachRecord::Pending));
        assert!(matches!(arrival.record("a", json!(1), false), ForEachRecord::Pending));
        match arrival.record("b", json!(2), false) {
            ForEachRecord::Complete(values) => assert_eq!(values, vec![json!(3), json!(1), json!(2)]),
            _ => panic!("expected completion"),
        }

        let mut sorted = ForEachState::new(marks);
        sorted.record("c", json!(3), true);
        sorted.record("a", json!(1), true);
        match sorted.record("b", json!(2), true) {
            ForEachRecord::Complete(values) => assert_eq!(values, vec![json!(1), json!(2), json!(3)]),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn for_each_state_rejects_unknown_items() {
        let mut state = ForEachState::new(vec!["a".to_string()]);
        assert!(matches!(state.record("zzz", json!(1), true), ForEachRecord::UnknownItem));
    }

    #[test]
    fn collect_state_filled_then_empty_requires_all_again() {
        let expected: BTreeSet<String> = ["r1", "r2"].iter().map(|s| s.to_string()).collect();
        let mut state = CollectState::default();
        let mode = CollectMode::FilledThenEmpty;

        assert!(state.record(&expected, "r1", json!(1), mode).is_none());
        assert_eq!(
            state.record(&expected, "r2", json!(2), mode),
            Some(json!({"r1": 1, "r2": 2}))
        );
        assert!(state.record(&expected, "r1", json!(3), mode).is_none());
    }

    #[test]
    fn join_state_and_mode_keeps_values_after_firing() {
        let expected = vec!["flag".to_string(), "phase".to_string()];
        let mut state = JoinState::default();
        assert!(state.record_all(&expected, "flag", json!("ready")).is_none());
        assert!(state.record_all(&expected, "phase", json!("ready")).is_some());
        assert_eq!(
            state.record_all(&expected, "flag", json!("again")),
            Some(json!({"flag": "again", "phase": "ready"}))
        );
    }
}
