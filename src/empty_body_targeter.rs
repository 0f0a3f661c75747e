// Copyright 2025 Martin Pool

//! Simple Empty-Body Targeter (component C7): confirm that emptying a
//! mutation's target actually perturbs at least one test.
//!
//! Grounded on `original_source/swesynth/mutation/validator/tester.py`'s
//! `get_related_test_cases` two-stage approximate→true pattern; this
//! component is the "true" stage, run against the *real* container rather
//! than the approximated call-graph map.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8Path;

use crate::container::{with_patch_applied, Container, ExecOutcome};
use crate::status::{TestStatus, TestStatusDiff};
use crate::test_log;

/// Run `empty_body_diff` against `candidate_subset` inside `container`, and
/// return the tests it perturbs relative to `pristine_status`, restricted
/// to that subset.
///
/// An empty result means the target has tests "on paper" (the call-graph
/// map says some test covers it) but actually emptying its body changes no
/// observable behavior — a cheap precondition for a useful mutation, so the
/// candidate can be rejected before ever calling the model.
pub async fn perturbed_tests(
    container: &Container,
    repo_dir: &Utf8Path,
    empty_body_diff: &str,
    candidate_subset: &BTreeSet<String>,
    pristine_status: &TestStatus,
    timeout: Duration,
) -> Result<BTreeSet<String>> {
    let diff = run_subset(container, repo_dir, empty_body_diff, candidate_subset, timeout).await?;
    let pristine_subset = pristine_status.shrink_to(candidate_subset);
    if diff.is_empty() {
        return Ok(BTreeSet::new());
    }
    let comparison = pristine_subset.diff_against(&diff);
    Ok(perturbation(&comparison))
}

async fn run_subset(
    container: &Container,
    repo_dir: &Utf8Path,
    diff: &str,
    subset: &BTreeSet<String>,
    timeout: Duration,
) -> Result<TestStatus> {
    let test_args = subset.iter().cloned().collect::<Vec<_>>().join(" ");
    let script = format!("cd {repo_dir} && pytest -q -rA {test_args}");
    with_patch_applied(container, repo_dir, diff, timeout, async move {
        match container.exec(&script, "empty-body-subset", timeout).await? {
            ExecOutcome::Finished { transcript, .. } => Ok(test_log::parse(&transcript)),
            ExecOutcome::Timeout { .. } => Ok(TestStatus::default()),
        }
    })
    .await
}

/// `PASS_TO_FAIL ∪ FAIL_TO_PASS`: the tests whose outcome actually changed.
fn perturbation(diff: &TestStatusDiff) -> BTreeSet<String> {
    diff.pass_to_fail.union(&diff.fail_to_pass).cloned().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn perturbation_is_union_of_pass_to_fail_and_fail_to_pass() {
        let mut diff = TestStatusDiff::default();
        diff.pass_to_fail = BTreeSet::from(["t::a".to_string()]);
        diff.fail_to_pass = BTreeSet::from(["t::b".to_string()]);
        diff.pass_to_pass = BTreeSet::from(["t::c".to_string()]);
        let perturbed = perturbation(&diff);
        assert_eq!(perturbed, BTreeSet::from(["t::a".to_string(), "t::b".to_string()]));
    }
}
