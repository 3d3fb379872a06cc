use parking_lot::Mutex;
use std::sync::Arc;

use crate::flow::conditions::CaseCondition;
use crate::flow::types::{MatchMode, Trigger};

/// 构建期的作用域记录，通过 `outer` 指向外层作用域
pub(crate) struct BlockData {
    pub kind: BlockKind,
    pub outer: Option<Arc<BlockData>>,
}

pub(crate) enum BlockKind {
    Root,
    ForEach(ForEachScope),
    Match(MatchScope),
}

pub(crate) struct ForEachScope {
    pub id: String,
    pub end_trigger: String,
}

pub(crate) struct MatchScope {
    pub id: String,
    pub mode: MatchMode,
    /// 打开 match 时所在的触发器，分派处理函数注册在这里
    pub branch_trigger: Trigger,
    pub else_trigger: String,
    pub end_trigger: String,
    pub branches: Mutex<MatchBranches>,
}

#[derive(Default)]
pub(crate) struct MatchBranches {
    pub cases: Vec<(String, CaseCondition)>,
    pub branch_ends: Vec<Trigger>,
    pub has_else: bool,
}

impl BlockData {
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            kind: BlockKind::Root,
            outer: None,
        })
    }

    pub fn nested(kind: BlockKind, outer: &Arc<BlockData>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outer: Some(Arc::clone(outer)),
        })
    }

    /// 离开当前作用域后回到的外层作用域
    pub fn exit(&self) -> Arc<BlockData> {
        self.outer.clone().unwrap_or_else(BlockData::root)
    }

    pub fn for_each_scope(&self) -> Option<&ForEachScope> {
        match &self.kind {
            BlockKind::ForEach(scope) => Some(scope),
            _ => None,
        }
    }

    pub fn match_scope(&self) -> Option<&MatchScope> {
        match &self.kind {
            BlockKind::Match(scope) => Some(scope),
            _ => None,
        }
    }
}
