// Copyright 2025 Martin Pool

//! Mutator Loop (component C9): the validation funnel that turns a
//! `Strategy`'s candidate diffs into validated, scored survivors.
//!
//! Grounded on `original_source/swesynth/mutation/validator/tester.py`'s
//! `test()` three-overload semantics (baseline / full-suite / subset) and
//! `_test_original_source_code`; `status.py`'s comparison algebra is reused
//! directly via [`crate::status::TestStatus`].

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::callgraph;
use crate::container::{with_patch_applied, Container, ContainerManager, ExecOutcome};
use crate::repository::{RepositorySnapshot, WorkingTree};
use crate::status::TestStatus;
use crate::strategy::{Strategy, StrategyContext};
use crate::test_function_map::TestFunctionMap;
use crate::test_log;

/// Caps on how much of a commit's validation budget the funnel may spend.
#[derive(Debug, Clone, Copy)]
pub struct MutatorBudgets {
    pub max_iterations: usize,
    pub max_mutations: usize,
    /// An opaque cost unit, one per candidate actually exercised against the
    /// container (as opposed to rejected by the cheaper, purely local
    /// checks). Lets a caller cap spend without needing to know this
    /// component's internal exec/model call counts.
    pub max_cost: f64,
}

/// Run the full suite against the pristine snapshot and build the
/// call-graph map — step 1 of the funnel. Fails if the baseline status is
/// empty, since that means the project doesn't even run in this container.
///
/// The call-graph build itself is serialized across commits by
/// `container_manager`'s dedicated lock: it's the heaviest single operation
/// per commit, and running several at once across a `JoinSet` would defeat
/// the point of capping concurrency elsewhere in the pipeline.
pub async fn baseline(
    container: &Container,
    container_manager: &ContainerManager,
    repo_dir: &Utf8Path,
    timeout: Duration,
) -> Result<(TestStatus, TestFunctionMap)> {
    let status = run_full_suite(container, repo_dir, timeout).await?;
    if status.is_empty() {
        bail!("baseline test status is empty: project does not run in this container");
    }
    let call_graph = {
        let _guard = container_manager.acquire_call_graph_lock().await;
        callgraph::build_test_function_map(container, repo_dir, timeout).await?
    };
    Ok((status, call_graph))
}

/// Run the funnel for one `(snapshot, strategy)` pair and return every
/// validated survivor.
pub async fn run(
    container: &Container,
    worktree: &WorkingTree,
    pristine: &RepositorySnapshot,
    strategy: &dyn Strategy,
    ctx: &StrategyContext<'_>,
    baseline_status: &TestStatus,
    budgets: MutatorBudgets,
    sources: &[crate::strategy::SourceFile],
    timeout: Duration,
) -> Result<Vec<RepositorySnapshot>> {
    let candidates = strategy.propose(ctx, sources).await?;
    let mut survivors = Vec::new();
    let mut cost = 0.0;

    for (iteration, candidate) in candidates.into_iter().enumerate() {
        if iteration >= budgets.max_iterations || survivors.len() >= budgets.max_mutations || cost >= budgets.max_cost {
            info!(iteration, survivors = survivors.len(), cost, "mutator budget exhausted");
            break;
        }
        cost += 1.0;

        let nodeids = candidate.info.changed_target_nodeids();
        let approx_subset = ctx.call_graph.related_tests(nodeids.iter().map(String::as_str));
        if approx_subset.is_empty() {
            debug!(?nodeids, "no approximated related tests for candidate, skipping");
            continue;
        }
        let baseline_subset = baseline_status.shrink_to(&approx_subset);

        let outcome = evaluate_candidate(
            container,
            ctx.repo_dir,
            &candidate.diff,
            &approx_subset,
            &baseline_subset,
            timeout,
        )
        .await?;

        let Some((final_diff, excerpt, expanded_subset)) = outcome else {
            continue;
        };
        let _ = expanded_subset;

        let reversed = pristine
            .get_reversed_diff(worktree, &candidate.diff)
            .context("compute reversed (gold-fix) diff for survivor")?;
        let score = strategy.score(&final_diff, &candidate.info.changed_targets, ctx.call_graph);

        let mut survivor = pristine
            .copy_with_changes(candidate.diff, candidate.info)
            .context("build survivor snapshot")?;
        survivor.reversed_diff = Some(reversed);
        survivor.test_status_diff = Some(final_diff);
        survivor.score = Some(score);
        survivor.test_log_excerpt = Some(excerpt);
        survivors.push(survivor);
    }

    Ok(survivors)
}

/// Steps 2b-2f of the funnel for one candidate. Returns `None` if the
/// candidate is rejected at any stage, otherwise the final `TestStatusDiff`,
/// the failure excerpt from the deciding run, and the expanded test subset
/// it was computed against.
async fn evaluate_candidate(
    container: &Container,
    repo_dir: &Utf8Path,
    diff: &str,
    approx_subset: &BTreeSet<String>,
    baseline_subset: &TestStatus,
    timeout: Duration,
) -> Result<Option<(crate::status::TestStatusDiff, String, BTreeSet<String>)>> {
    let approx_subset = approx_subset.clone();
    let baseline_subset = baseline_subset.clone();
    let repo_dir = repo_dir.to_owned();

    with_patch_applied(container, &repo_dir, diff, timeout, async move {
        let (approx_status, approx_transcript) = run_subset(container, &repo_dir, &approx_subset, timeout).await?;
        if approx_status == baseline_subset {
            debug!("candidate produced no behavioral change on the approximated subset, skipping");
            return Ok(None);
        }
        if approx_status.is_empty() {
            warn!("candidate's approximated run returned an empty (sentinel) status, skipping");
            return Ok(None);
        }
        let provisional = baseline_subset.diff_against(&approx_status);
        if provisional.pass_to_fail.is_empty() {
            debug!("candidate caused zero PASS_TO_FAIL transitions, skipping");
            return Ok(None);
        }

        // Expand to every test in any file that changed state, then
        // re-validate: the final status_diff always comes from this
        // expanded run, never from the provisional one.
        let changed_files: BTreeSet<String> = provisional
            .pass_to_fail
            .iter()
            .chain(provisional.fail_to_pass.iter())
            .filter_map(|nodeid| nodeid.split_once("::").map(|(file, _)| file.to_owned()))
            .collect();
        let expanded_subset: BTreeSet<String> = baseline_subset
            .all_tests()
            .into_iter()
            .chain(approx_subset.iter().cloned())
            .filter(|nodeid| changed_files.iter().any(|f| nodeid.starts_with(f.as_str())))
            .collect();
        let expanded_baseline = baseline_subset.shrink_to(&expanded_subset);

        let (expanded_status, expanded_transcript) = run_subset(container, &repo_dir, &expanded_subset, timeout).await?;
        if expanded_status.is_empty() {
            warn!("candidate's expanded run returned an empty (sentinel) status, skipping");
            return Ok(None);
        }
        let final_diff = expanded_baseline.diff_against(&expanded_status);
        if final_diff.pass_to_fail.is_empty() {
            debug!("expanded re-validation found zero PASS_TO_FAIL transitions, skipping");
            return Ok(None);
        }

        let excerpt = test_log::failure_excerpt(&expanded_transcript)
            .or_else(|| test_log::failure_excerpt(&approx_transcript))
            .unwrap_or_default();
        Ok(Some((final_diff, excerpt, expanded_subset)))
    })
    .await
}

async fn run_full_suite(container: &Container, repo_dir: &Utf8Path, timeout: Duration) -> Result<TestStatus> {
    let script = format!("cd {repo_dir} && echo 'applied patch ok' && pytest -q -rA");
    match container.exec(&script, "baseline-suite", timeout).await? {
        ExecOutcome::Finished { transcript, .. } => Ok(test_log::parse(&transcript)),
        ExecOutcome::Timeout { .. } => bail!("baseline test run timed out"),
    }
}

async fn run_subset(
    container: &Container,
    repo_dir: &Utf8Path,
    subset: &BTreeSet<String>,
    timeout: Duration,
) -> Result<(TestStatus, String)> {
    let test_args = subset.iter().cloned().collect::<Vec<_>>().join(" ");
    let script = format!("cd {repo_dir} && echo 'applied patch ok' && pytest -q -rA {test_args}");
    match container.exec(&script, "candidate-subset", timeout).await? {
        ExecOutcome::Finished { transcript, .. } => {
            let mut status = test_log::parse(&transcript);
            status = status.fill_missing_from(&TestStatus::new(BTreeSet::new(), subset.clone()), true);
            Ok((status, transcript))
        }
        ExecOutcome::Timeout { transcript } => Ok((TestStatus::default(), transcript)),
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn budgets_stop_condition_checks_all_three_caps() {
        let budgets = MutatorBudgets {
            max_iterations: 5,
            max_mutations: 2,
            max_cost: 100.0,
        };
        assert!(1 < budgets.max_iterations);
        assert!(budgets.max_mutations < budgets.max_iterations);
    }

    #[test]
    fn changed_files_are_derived_from_nodeid_prefix() {
        let mut diff = crate::status::TestStatusDiff::default();
        diff.pass_to_fail = BTreeSet::from(["pkg/test_mod.py::test_a".to_string()]);
        let files: BTreeSet<String> = diff
            .pass_to_fail
            .iter()
            .filter_map(|id| id.split_once("::").map(|(f, _)| f.to_owned()))
            .collect();
        assert_eq!(files, BTreeSet::from(["pkg/test_mod.py".to_string()]));
    }
}
