use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Result, TriggerFlowError};
use crate::flow::block::{BlockData, BlockKind, MatchBranches, MatchScope};
use crate::flow::builder::Process;
use crate::flow::conditions::CaseCondition;
use crate::flow::handler::Handler;
use crate::flow::types::{new_mark, MatchMode, Trigger};
use crate::runtime::{barrier_key, EventData, MatchState};

impl Process {
    /// 打开一个 match 作用域；分支在 `end_match` 时统一登记
    pub fn match_on(&self, mode: MatchMode) -> Process {
        let match_id = new_mark();
        let scope = MatchScope {
            else_trigger: format!("Match-{}-Else", match_id),
            end_trigger: format!("Match-{}-End", match_id),
            id: match_id,
            mode,
            branch_trigger: self.trigger.clone(),
            branches: Default::default(),
        };
        let block = BlockData::nested(BlockKind::Match(scope), &self.block);
        Process::new(self.trigger.clone(), self.blue_print.clone(), block)
    }

    pub fn case(&self, condition: impl Into<CaseCondition>) -> Result<Process> {
        let scope = self.block.match_scope().ok_or_else(|| {
            TriggerFlowError::invalid_construct("case", "not inside a match block")
        })?;
        let mut branches = scope.branches.lock();
        if branches.has_else {
            return Err(TriggerFlowError::invalid_construct(
                "case",
                "cannot add a case after case_else",
            ));
        }
        if !branches.cases.is_empty() {
            branches.branch_ends.push(self.trigger.clone());
        }
        let case_trigger = format!("Match-{}-Case-{}", scope.id, new_mark());
        branches
            .cases
            .push((case_trigger.clone(), condition.into()));
        Ok(self.at(Trigger::event(case_trigger)))
    }

    pub fn case_else(&self) -> Result<Process> {
        let scope = self.block.match_scope().ok_or_else(|| {
            TriggerFlowError::invalid_construct("case_else", "not inside a match block")
        })?;
        let mut branches = scope.branches.lock();
        if branches.cases.is_empty() {
            return Err(TriggerFlowError::invalid_construct(
                "case_else",
                "needs at least one case before it",
            ));
        }
        if branches.has_else {
            return Err(TriggerFlowError::invalid_construct(
                "case_else",
                "already declared for this match",
            ));
        }
        branches.has_else = true;
        branches.branch_ends.push(self.trigger.clone());
        Ok(self.at(Trigger::event(scope.else_trigger.clone())))
    }

    /// 关闭 match 作用域，登记分派处理函数和各分支的收尾处理函数
    pub fn end_match(&self) -> Result<Process> {
        let scope = self.block.match_scope().ok_or_else(|| {
            TriggerFlowError::invalid_construct("end_match", "not inside a match block")
        })?;

        let (cases, branch_ends, has_else) = {
            let mut branches = scope.branches.lock();
            if branches.cases.is_empty() {
                return Err(TriggerFlowError::invalid_construct(
                    "end_match",
                    "match has no case",
                ));
            }
            branches.branch_ends.push(self.trigger.clone());
            let MatchBranches {
                cases,
                branch_ends,
                has_else,
            } = &*branches;
            (Arc::new(cases.clone()), branch_ends.clone(), *has_else)
        };

        let dispatch = match scope.mode {
            MatchMode::HitFirst => hit_first_dispatch(scope, cases, has_else),
            MatchMode::HitAll => hit_all_dispatch(scope, cases, has_else),
        };
        self.blue_print.add_handler(
            scope.branch_trigger.kind,
            &scope.branch_trigger.name,
            dispatch,
            None,
        );

        let collector = match scope.mode {
            MatchMode::HitFirst => forward_to_end(scope),
            MatchMode::HitAll => collect_branches(scope),
        };
        for branch_end in &branch_ends {
            self.blue_print
                .add_handler(branch_end.kind, &branch_end.name, collector.clone(), None);
        }

        Ok(Process::new(
            Trigger::event(scope.end_trigger.clone()),
            self.blue_print.clone(),
            self.block.exit(),
        ))
    }

    /// `match_on(HitFirst).case(condition)` 的简写
    pub fn if_condition(&self, condition: impl Into<CaseCondition>) -> Result<Process> {
        self.match_on(MatchMode::HitFirst).case(condition)
    }

    pub fn elif_condition(&self, condition: impl Into<CaseCondition>) -> Result<Process> {
        self.case(condition)
    }

    pub fn else_condition(&self) -> Result<Process> {
        self.case_else()
    }

    pub fn end_condition(&self) -> Result<Process> {
        self.end_match()
    }
}

type Cases = Arc<Vec<(String, CaseCondition)>>;

fn hit_first_dispatch(scope: &MatchScope, cases: Cases, has_else: bool) -> Handler {
    let else_trigger = scope.else_trigger.clone();
    let end_trigger = scope.end_trigger.clone();
    Handler::new(move |data: EventData| {
        let cases = Arc::clone(&cases);
        let fallback = if has_else {
            else_trigger.clone()
        } else {
            end_trigger.clone()
        };
        async move {
            let target = cases
                .iter()
                .find(|(_, condition)| condition.matches(&data))
                .map(|(case_trigger, _)| case_trigger.clone())
                .unwrap_or(fallback);
            data.emit(target, data.value().clone()).await?;
            Ok(Value::Null)
        }
    })
    .named("match")
}

/// 每个命中的分支压入一层标记，并在父层级下登记待填充的槽位
fn hit_all_dispatch(scope: &MatchScope, cases: Cases, has_else: bool) -> Handler {
    let match_id = scope.id.clone();
    let else_trigger = scope.else_trigger.clone();
    let end_trigger = scope.end_trigger.clone();
    Handler::new(move |data: EventData| {
        let cases = Arc::clone(&cases);
        let match_id = match_id.clone();
        let else_trigger = else_trigger.clone();
        let end_trigger = end_trigger.clone();
        async move {
            let mut hits: Vec<String> = cases
                .iter()
                .filter(|(_, condition)| condition.matches(&data))
                .map(|(case_trigger, _)| case_trigger.clone())
                .collect();
            if hits.is_empty() {
                if !has_else {
                    data.emit(end_trigger, json!([])).await?;
                    return Ok(Value::Null);
                }
                hits.push(else_trigger);
            }

            let branch_marks: Vec<String> = hits.iter().map(|_| new_mark()).collect();
            {
                let mut matches = data.execution().barriers().matches.lock().await;
                matches.insert(
                    barrier_key(&match_id, data.layer_mark()),
                    MatchState::new(branch_marks.clone()),
                );
            }

            let execution = data.execution();
            try_join_all(hits.into_iter().zip(branch_marks).map(|(branch, mark)| {
                let mut marks = data.layer_marks().to_vec();
                marks.push(mark);
                execution.emit_with(Trigger::event(branch), data.value().clone(), marks)
            }))
            .await?;
            Ok(Value::Null)
        }
    })
    .named("match_all")
}

fn forward_to_end(scope: &MatchScope) -> Handler {
    let end_trigger = scope.end_trigger.clone();
    Handler::new(move |data: EventData| {
        let end_trigger = end_trigger.clone();
        async move {
            data.emit(end_trigger, data.value().clone()).await?;
            Ok(Value::Null)
        }
    })
    .named("end_match")
}

/// 所有命中分支都到达后，按分支登记顺序发出结果列表并弹出分支标记
fn collect_branches(scope: &MatchScope) -> Handler {
    let match_id = scope.id.clone();
    let end_trigger = scope.end_trigger.clone();
    Handler::new(move |data: EventData| {
        let match_id = match_id.clone();
        let end_trigger = end_trigger.clone();
        async move {
            let key = barrier_key(&match_id, data.upper_layer_mark());
            let (tracked, output) = {
                let mut matches = data.execution().barriers().matches.lock().await;
                let branch_mark = data.layer_mark().unwrap_or_default();
                let record = matches
                    .get_mut(&key)
                    .filter(|state| state.contains(branch_mark))
                    .map(|state| state.record(branch_mark, data.value().clone()));
                match record {
                    Some(output) => {
                        if output.is_some() {
                            matches.remove(&key);
                        }
                        (true, output)
                    }
                    None => (false, None),
                }
            };

            if !tracked {
                data.emit(end_trigger, data.value().clone()).await?;
                return Ok(Value::Null);
            }
            if let Some(values) = output {
                let mut data = data;
                data.layer_out();
                data.emit(end_trigger, Value::Array(values)).await?;
            }
            Ok(Value::Null)
        }
    })
    .named("end_match_all")
}
