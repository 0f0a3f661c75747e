// Copyright 2025 Martin Pool

//! [`TestStatus`] and [`TestStatusDiff`]: the comparison algebra the whole
//! validation funnel is built on.
//!
//! Grounded on
//! `original_source/swesynth/mutation/validator/entities/status.py`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Fatal sentinels that mean "the run produced no information", as opposed
/// to an ordinary passed/failed result.
pub const FATAL_SENTINELS: &[&str] = &[
    "APPLY_PATCH_FAIL",
    "RESET_FAILED",
    "TESTS_ERROR",
    "TESTS_TIMEOUT",
    "Failed to reset task environment",
];

/// The passed/failed test node-IDs observed from one test run.
///
/// `passed` and `failed` are always disjoint: a node-ID present in both
/// would be a parser bug, and callers should treat it as such rather than
/// silently picking a winner.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestStatus {
    pub passed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl TestStatus {
    pub fn new(passed: BTreeSet<String>, failed: BTreeSet<String>) -> Self {
        TestStatus { passed, failed }
    }

    pub fn is_empty(&self) -> bool {
        self.passed.is_empty() && self.failed.is_empty()
    }

    pub fn all_tests(&self) -> BTreeSet<String> {
        self.passed.union(&self.failed).cloned().collect()
    }

    /// Restrict this status to just the node-IDs in `subset`.
    pub fn shrink_to(&self, subset: &BTreeSet<String>) -> TestStatus {
        TestStatus {
            passed: self.passed.intersection(subset).cloned().collect(),
            failed: self.failed.intersection(subset).cloned().collect(),
        }
    }

    /// Node-IDs present in `reference` but missing from `self` inherit
    /// `failed` status: a test that should have run but produced no line
    /// counts as failed, not as "didn't happen".
    ///
    /// Passes already recorded in `self` are left untouched.
    pub fn fill_missing_from(&self, reference: &TestStatus, as_failed: bool) -> TestStatus {
        assert!(as_failed, "fill_missing_from is only defined for as_failed=true");
        let known = self.all_tests();
        let mut failed = self.failed.clone();
        for nodeid in reference.all_tests().difference(&known) {
            failed.insert(nodeid.clone());
        }
        TestStatus {
            passed: self.passed.clone(),
            failed,
        }
    }

    /// Compare `self` (before) against `after`, restricted to the tests
    /// both runs actually executed, and partition them into the four-way
    /// `TestStatusDiff`.
    pub fn diff_against(&self, after: &TestStatus) -> TestStatusDiff {
        let common: BTreeSet<String> = self.all_tests().intersection(&after.all_tests()).cloned().collect();
        let mut diff = TestStatusDiff::default();
        for nodeid in common {
            let was_pass = self.passed.contains(&nodeid);
            let is_pass = after.passed.contains(&nodeid);
            match (was_pass, is_pass) {
                (true, true) => diff.pass_to_pass.insert(nodeid),
                (true, false) => diff.pass_to_fail.insert(nodeid),
                (false, true) => diff.fail_to_pass.insert(nodeid),
                (false, false) => diff.fail_to_fail.insert(nodeid),
            };
        }
        diff
    }

    /// Parse the bundled pytest-session text between the collection-start
    /// and summary markers into pass/fail sets.
    ///
    /// Returns an empty `TestStatus` if any fatal sentinel is present, or
    /// if the "applied patch" confirmation line the harness writes before
    /// running tests is absent — both cases mean "treat as no information",
    /// per the specification's error-handling design.
    pub fn parse_test_output(output: &str) -> TestStatus {
        if FATAL_SENTINELS.iter().any(|s| output.contains(s)) || !output.contains("applied patch") {
            return TestStatus::default();
        }
        let mut passed = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for line in output.lines() {
            let Some((nodeid, outcome)) = parse_result_line(line) else {
                continue;
            };
            match outcome {
                "PASSED" | "XFAIL" => {
                    passed.insert(nodeid.to_owned());
                }
                "FAILED" | "ERROR" => {
                    failed.insert(nodeid.to_owned());
                }
                // SKIPPED is dropped entirely: it counts as neither.
                _ => {}
            }
        }
        TestStatus { passed, failed }
    }
}

/// Parse one `pytest -rA`-style result line, e.g.
/// `"pkg/test_mod.py::test_a PASSED"`, into `(nodeid, outcome)`.
fn parse_result_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (nodeid, rest) = line.split_once(char::is_whitespace)?;
    if !nodeid.contains("::") {
        return None;
    }
    let outcome = rest.trim().split_whitespace().next()?;
    if matches!(outcome, "PASSED" | "FAILED" | "ERROR" | "XFAIL" | "SKIPPED") {
        Some((nodeid, outcome))
    } else {
        None
    }
}

/// The four-way partition of a set of tests by (before, after) status.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TestStatusDiff {
    pub pass_to_pass: BTreeSet<String>,
    pub pass_to_fail: BTreeSet<String>,
    pub fail_to_pass: BTreeSet<String>,
    pub fail_to_fail: BTreeSet<String>,
}

impl TestStatusDiff {
    pub fn is_empty(&self) -> bool {
        self.pass_to_pass.is_empty()
            && self.pass_to_fail.is_empty()
            && self.fail_to_pass.is_empty()
            && self.fail_to_fail.is_empty()
    }

    pub fn all_tests(&self) -> BTreeSet<String> {
        self.pass_to_pass
            .iter()
            .chain(&self.pass_to_fail)
            .chain(&self.fail_to_pass)
            .chain(&self.fail_to_fail)
            .cloned()
            .collect()
    }

    /// `len(PASS_TO_FAIL) / total_tests`, or `-1.0` if no tests ran.
    pub fn score(&self) -> f64 {
        let total = self.all_tests().len();
        if total == 0 {
            -1.0
        } else {
            self.pass_to_fail.len() as f64 / total as f64
        }
    }

    /// Swap PASS_TO_FAIL and FAIL_TO_PASS, as required when exporting a
    /// mutation-direction diff into the fix-direction shape downstream
    /// evaluators expect (the reversed diff is the "fix").
    pub fn swapped(&self) -> TestStatusDiff {
        TestStatusDiff {
            pass_to_pass: self.pass_to_pass.clone(),
            fail_to_fail: self.fail_to_fail.clone(),
            pass_to_fail: self.fail_to_pass.clone(),
            fail_to_pass: self.pass_to_fail.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_against_partitions_common_tests() {
        let before = TestStatus::new(set(&["t::a", "t::b"]), set(&["t::c"]));
        let after = TestStatus::new(set(&["t::a", "t::c"]), set(&["t::b"]));
        let diff = before.diff_against(&after);
        assert_eq!(diff.pass_to_pass, set(&["t::a"]));
        assert_eq!(diff.pass_to_fail, set(&["t::b"]));
        assert_eq!(diff.fail_to_pass, set(&["t::c"]));
        assert!(diff.fail_to_fail.is_empty());
    }

    #[test]
    fn diff_against_is_disjoint_and_covers_intersection() {
        let before = TestStatus::new(set(&["t::a"]), set(&["t::b"]));
        let after = TestStatus::new(set(&["t::a", "t::b"]), BTreeSet::new());
        let diff = before.diff_against(&after);
        let union: BTreeSet<_> = diff
            .pass_to_pass
            .union(&diff.pass_to_fail)
            .chain(diff.fail_to_pass.iter())
            .chain(diff.fail_to_fail.iter())
            .cloned()
            .collect();
        assert_eq!(union, before.all_tests().intersection(&after.all_tests()).cloned().collect());
    }

    #[test]
    fn fill_missing_from_adds_missing_as_failed_and_keeps_passes() {
        let reference = TestStatus::new(set(&["t::a", "t::b", "t::c"]), BTreeSet::new());
        let partial = TestStatus::new(set(&["t::a"]), BTreeSet::new());
        let filled = partial.fill_missing_from(&reference, true);
        assert_eq!(filled.passed, set(&["t::a"]));
        assert_eq!(filled.failed, set(&["t::b", "t::c"]));
    }

    #[test]
    fn parse_test_output_returns_empty_on_fatal_sentinel() {
        let output = "applied patch ok\nTESTS_TIMEOUT\nt::a PASSED\n";
        assert!(TestStatus::parse_test_output(output).is_empty());
    }

    #[test]
    fn parse_test_output_requires_applied_patch_confirmation() {
        let output = "t::a PASSED\n";
        assert!(TestStatus::parse_test_output(output).is_empty());
    }

    #[test]
    fn parse_test_output_classifies_outcomes() {
        let output = "applied patch ok\n\
             t::a PASSED\n\
             t::b FAILED\n\
             t::c ERROR\n\
             t::d XFAIL\n\
             t::e SKIPPED\n";
        let status = TestStatus::parse_test_output(output);
        assert_eq!(status.passed, set(&["t::a", "t::d"]));
        assert_eq!(status.failed, set(&["t::b", "t::c"]));
    }

    #[test]
    fn score_is_pass_to_fail_fraction_of_total() {
        let mut diff = TestStatusDiff::default();
        diff.pass_to_fail = set(&["t::a"]);
        diff.pass_to_pass = set(&["t::b", "t::c"]);
        assert_eq!(diff.score(), 1.0 / 3.0);
    }

    #[test]
    fn score_is_negative_one_when_no_tests_ran() {
        assert_eq!(TestStatusDiff::default().score(), -1.0);
    }

    #[test]
    fn swap_round_trips() {
        let mut diff = TestStatusDiff::default();
        diff.pass_to_fail = set(&["t::a"]);
        diff.fail_to_pass = set(&["t::b"]);
        diff.pass_to_pass = set(&["t::c"]);
        let swapped = diff.swapped();
        assert_eq!(swapped.fail_to_pass, set(&["t::a"]));
        assert_eq!(swapped.pass_to_fail, set(&["t::b"]));
        assert_eq!(swapped.swapped(), diff);
    }
}
