// Copyright 2025 Martin Pool

//! Mutation Strategies (component C8): select candidate targets, call the
//! model, assemble `(diff, MutationInfo)` pairs.
//!
//! The three concrete strategies ([`empty_function`], [`empty_class`],
//! [`priority_aware`]) share [`run_common_frame`], the per-target loop of
//! spec step 1-6; each only supplies target *selection* and its own extra
//! rejection rule. This mirrors how the teacher's `visit.rs` walked the AST
//! once and let each `MutationOp` only decide how to rewrite a matched node.

pub mod empty_class;
pub mod empty_function;
pub mod priority_aware;

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use camino::Utf8Path;
use tracing::debug;

use crate::container::Container;
use crate::empty_body_targeter;
use crate::model::{extract_code, ModelClient};
use crate::patch::unified_diff;
use crate::path::TreeRelativePathBuf;
use crate::source_transform::{self, ClassDef, FunctionDef, DEFAULT_EMPTY_BODY, HINT_PLACEHOLDER};
use crate::status::{TestStatus, TestStatusDiff};
use crate::target::{MutationInfo, StrategyTag, Target};
use crate::test_function_map::TestFunctionMap;

/// How many distinct candidate diffs a single target is allowed to yield
/// before the strategy moves on, so one stubborn target can't monopolize a
/// commit's budget.
pub const MUTATIONS_PER_TARGET: usize = 3;

/// One file from the working tree, read once and reused across every
/// target found in it.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: TreeRelativePathBuf,
    pub text: String,
}

/// A single function or whole class, the unit a strategy mutates at once.
pub enum MutationSite {
    Function(FunctionDef),
    Class(ClassDef),
}

impl MutationSite {
    pub fn nodeids(&self) -> Vec<String> {
        match self {
            MutationSite::Function(f) => vec![f.target.nodeid()],
            MutationSite::Class(c) => c.methods.iter().map(|m| m.target.nodeid()).collect(),
        }
    }

    pub fn changed_targets(&self) -> Vec<Target> {
        match self {
            MutationSite::Function(f) => vec![f.target.clone()],
            MutationSite::Class(c) => c.methods.iter().map(|m| m.target.clone()).collect(),
        }
    }

    pub fn empty_text(&self, source: &str) -> String {
        match self {
            MutationSite::Function(f) => source_transform::empty_function(source, f, DEFAULT_EMPTY_BODY),
            MutationSite::Class(c) => source_transform::empty_class(source, c, DEFAULT_EMPTY_BODY),
        }
    }

    pub fn hint_text(&self, source: &str) -> String {
        match self {
            MutationSite::Function(f) => source_transform::hint_function(source, f),
            MutationSite::Class(c) => source_transform::hint_class(source, c),
        }
    }

    pub fn splice(&self, source: &str, new_body: &str) -> String {
        match self {
            MutationSite::Function(f) => source_transform::replace_function(source, f, new_body, true),
            MutationSite::Class(c) => source_transform::replace_class_body(source, c, new_body),
        }
    }

    /// Occurrences of the empty-body placeholder across this site's own
    /// span in `text` — used by [`empty_class`] to detect a no-op fill.
    pub fn placeholder_count(&self, text: &str) -> usize {
        let lines: Vec<&str> = text.lines().collect();
        let (start, end) = match self {
            MutationSite::Function(f) => (f.whole_span.start.line, f.whole_span.end.line),
            MutationSite::Class(c) => (c.whole_span.start.line, c.whole_span.end.line),
        };
        lines
            .iter()
            .take(end.min(lines.len()))
            .skip(start.saturating_sub(1))
            .filter(|line| line.contains(DEFAULT_EMPTY_BODY))
            .count()
    }
}

/// Everything a strategy needs to run one commit's worth of proposals.
pub struct StrategyContext<'a> {
    pub container: &'a Container,
    pub repo_dir: &'a Utf8Path,
    pub model: &'a dyn ModelClient,
    pub call_graph: &'a TestFunctionMap,
    pub pristine_status: &'a TestStatus,
    pub already_mutated: &'a HashSet<String>,
    pub exec_timeout: Duration,
    pub model_name: String,
}

/// A produced, not-yet-validated mutation.
pub struct Candidate {
    pub diff: String,
    pub info: MutationInfo,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn tag(&self) -> StrategyTag;

    /// Propose candidates from `sources`, the set of non-test source files
    /// in the working tree.
    async fn propose(&self, ctx: &StrategyContext<'_>, sources: &[SourceFile]) -> Result<Vec<Candidate>>;

    /// The value recorded on a validated survivor. Defaults to the
    /// PASS_TO_FAIL fraction of `diff`; [`priority_aware`] scales this by
    /// the targets' call-graph centrality.
    fn score(&self, diff: &TestStatusDiff, _targets: &[Target], _call_graph: &TestFunctionMap) -> f64 {
        diff.score()
    }
}

/// True if `relative_path` should never be scanned for targets: it's a test
/// file, or no test in the call-graph map is known to depend on anything in
/// it.
pub fn skip_path(relative_path: &TreeRelativePathBuf) -> bool {
    relative_path.contains_component_with("test")
}

/// A target is eligible once the call-graph map shows at least one of its
/// node-IDs is covered by some test, and it hasn't already been mutated in a
/// prior, resumed run.
pub fn is_eligible(nodeids: &[String], call_graph: &TestFunctionMap, already_mutated: &HashSet<String>) -> bool {
    nodeids.iter().any(|id| !already_mutated.contains(id)) && nodeids.iter().any(|id| call_graph.degree_of(id) > 0)
}

/// The per-target loop shared by all three strategies (spec.md §4.8 steps
/// 1-6). `site` must already have passed [`is_eligible`].
///
/// `reject_extra` gets `(original_text, spliced_text)` and returns true to
/// discard the candidate for a strategy-specific reason beyond the shared
/// import-injection and no-op checks.
pub async fn propose_for_site(
    ctx: &StrategyContext<'_>,
    tag: StrategyTag,
    source: &SourceFile,
    site: &MutationSite,
    reject_extra: impl Fn(&MutationSite, &str, &str) -> bool,
) -> Result<Vec<Candidate>> {
    let empty_text = site.empty_text(&source.text);
    let empty_diff = unified_diff(&source.relative_path.to_string(), &source.text, &empty_text);

    let subset = ctx.call_graph.related_tests(site.nodeids().iter().map(String::as_str));
    if subset.is_empty() {
        debug!(target = ?site.nodeids(), "no approximated related tests, skipping");
        return Ok(Vec::new());
    }

    let perturbed = empty_body_targeter::perturbed_tests(
        ctx.container,
        ctx.repo_dir,
        &empty_diff,
        &subset,
        ctx.pristine_status,
        ctx.exec_timeout,
    )
    .await?;
    if perturbed.is_empty() {
        debug!(target = ?site.nodeids(), "emptying the body perturbed no tests, skipping");
        return Ok(Vec::new());
    }

    let hint_text = site.hint_text(&source.text);
    let system_prompt = "You will be shown a Python file with one function or class body replaced by a placeholder. Reply with only the missing body, re-indented to match the surrounding code, and nothing else: no markdown fences, no imports, no explanation.";
    let user_prompt = format!(
        "File with the body removed:\n\n{empty_text}\n\nSignature-only hint (the body to replace is marked {HINT_PLACEHOLDER}):\n\n{hint_text}"
    );

    let mut candidates = Vec::new();
    let mut seen_diffs: BTreeSet<String> = BTreeSet::new();
    for _ in 0..MUTATIONS_PER_TARGET {
        let raw_output = ctx.model.complete(system_prompt, &user_prompt).await?;
        let body = extract_code(&raw_output);
        if introduces_new_import(&source.text, &body) {
            debug!(target = ?site.nodeids(), "model output introduced a new import, rejecting");
            continue;
        }
        let spliced = site.splice(&source.text, &body);
        if reject_extra(site, &empty_text, &spliced) {
            continue;
        }
        let diff = unified_diff(&source.relative_path.to_string(), &source.text, &spliced);
        if diff.trim().is_empty() || !seen_diffs.insert(diff.clone()) {
            continue;
        }
        candidates.push(Candidate {
            diff,
            info: MutationInfo {
                changed_targets: site.changed_targets(),
                metadata: empty_body_metadata(&empty_diff),
                strategy: tag,
                model_raw_output: raw_output,
                mutator_model_name: ctx.model_name.clone(),
            },
        });
    }
    Ok(candidates)
}

fn empty_body_metadata(empty_diff: &str) -> std::collections::HashMap<String, serde_json::Value> {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("empty_body_diff".to_owned(), serde_json::Value::String(empty_diff.to_owned()));
    metadata
}

/// True if `new_text` contains a top-level `import ...` / `from ... import
/// ...` line that `old_text` didn't already have — the "body only" contract
/// violation that makes a candidate unusable regardless of its test effect.
fn introduces_new_import(old_text: &str, new_text: &str) -> bool {
    let old_imports: BTreeSet<&str> = old_text.lines().filter(|l| is_import_line(l)).collect();
    new_text.lines().filter(|l| is_import_line(l)).any(|l| !old_imports.contains(l))
}

fn is_import_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    (trimmed.starts_with("import ") || trimmed.starts_with("from ")) && line.chars().next().map_or(false, |c| !c.is_whitespace())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn import_injection_is_detected_only_for_new_lines() {
        let old = "import os\n\ndef f():\n    return 1\n";
        let same = "import os\n\ndef f():\n    return os.getcwd()\n";
        assert!(!introduces_new_import(old, same));
        let added = "import os\nimport sys\n\ndef f():\n    return 1\n";
        assert!(introduces_new_import(old, added));
    }

    #[test]
    fn indented_import_like_text_is_not_flagged() {
        let old = "def f():\n    return 1\n";
        let new = "def f():\n    x = \"import foo\"\n    return x\n";
        assert!(!introduces_new_import(old, new));
    }

    #[test]
    fn eligibility_requires_call_graph_coverage_and_not_already_mutated() {
        let mut test_to_functions = std::collections::BTreeMap::new();
        test_to_functions.insert("t::a".to_string(), BTreeSet::from(["mod.py::f".to_string()]));
        let map = TestFunctionMap::from_test_to_functions(test_to_functions);
        let none_mutated = HashSet::new();
        assert!(is_eligible(&["mod.py::f".to_string()], &map, &none_mutated));
        assert!(!is_eligible(&["mod.py::unknown".to_string()], &map, &none_mutated));
        let already = HashSet::from(["mod.py::f".to_string()]);
        assert!(!is_eligible(&["mod.py::f".to_string()], &map, &already));
    }
}
