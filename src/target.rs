// Copyright 2025 Martin Pool

//! [`Target`] identifies a syntactic unit (function or class) that a
//! mutation strategy may propose to change, and [`MutationInfo`] records
//! what was actually done to it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::TreeRelativePathBuf;
use crate::textedit::Span;

/// The kind of syntactic unit a [`Target`] refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Function,
    Class,
}

/// A reference to a function or class definition inside a file.
///
/// Equality and hashing use `(relative_path, name, span)`, not object
/// identity, so the same definition recovered from two independent parses
/// of the same source text compares equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub relative_path: TreeRelativePathBuf,
    pub kind: TargetKind,
    pub name: String,
    pub span: Span,
}

impl Target {
    pub fn new(
        relative_path: TreeRelativePathBuf,
        kind: TargetKind,
        name: impl Into<String>,
        span: Span,
    ) -> Self {
        Target {
            relative_path,
            kind,
            name: name.into(),
            span,
        }
    }

    /// `"{relative_path}::{name}"`, the stable identifier used throughout
    /// the call-graph map and test-status records.
    pub fn nodeid(&self) -> String {
        format!("{}::{}", self.relative_path, self.name)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.relative_path == other.relative_path
            && self.name == other.name
            && self.span.start.line == other.span.start.line
            && self.span.start.column == other.span.start.column
            && self.span.end.line == other.span.end.line
            && self.span.end.column == other.span.end.column
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.relative_path.hash(state);
        self.name.hash(state);
        self.span.start.line.hash(state);
        self.span.start.column.hash(state);
        self.span.end.line.hash(state);
        self.span.end.column.hash(state);
    }
}

/// The strategy that produced a [`MutationInfo`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    EmptyFunction,
    EmptyClass,
    PriorityAware,
}

impl StrategyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyTag::EmptyFunction => "empty_function",
            StrategyTag::EmptyClass => "empty_class",
            StrategyTag::PriorityAware => "priority_aware",
        }
    }
}

/// Everything recorded about how a candidate diff was produced, carried
/// alongside the diff itself through the validation funnel and persisted
/// with every survivor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationInfo {
    pub changed_targets: Vec<Target>,
    /// Free-form metadata: the empty-body diff (reused by C7), the
    /// signature hint shown to the model, the pre-mutation file text, etc.
    pub metadata: HashMap<String, Value>,
    pub strategy: StrategyTag,
    pub model_raw_output: String,
    pub mutator_model_name: String,
}

impl MutationInfo {
    pub fn changed_target_nodeids(&self) -> Vec<String> {
        self.changed_targets.iter().map(Target::nodeid).collect()
    }
}

#[cfg(test)]
mod test {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::textedit::LineColumn;

    fn span(start_line: usize, end_line: usize) -> Span {
        Span {
            start: LineColumn {
                line: start_line,
                column: 1,
            },
            end: LineColumn {
                line: end_line,
                column: 1,
            },
        }
    }

    #[test]
    fn nodeid_joins_path_and_name() {
        let t = Target::new(
            TreeRelativePathBuf::new(Utf8PathBuf::from("pkg/mod.py")),
            TargetKind::Function,
            "f",
            span(1, 3),
        );
        assert_eq!(t.nodeid(), "pkg/mod.py::f");
    }

    #[test]
    fn equality_ignores_identity_and_kind_order() {
        let path = TreeRelativePathBuf::new(Utf8PathBuf::from("pkg/mod.py"));
        let a = Target::new(path.clone(), TargetKind::Function, "f", span(1, 3));
        let b = Target::new(path, TargetKind::Function, "f", span(1, 3));
        assert_eq!(a, b);
    }
}
