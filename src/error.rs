// Copyright 2025 Martin Pool

//! The error taxonomy from the validation funnel.
//!
//! Most of this crate returns plain [anyhow::Result], the same as the
//! teacher it was built from. This module exists only where a caller needs
//! to pattern-match on *which kind* of failure occurred, to decide between
//! "skip this candidate", "abort this commit", and "fatal for the process" —
//! the three buckets in the specification's error-handling design.

use std::fmt;

use camino::Utf8PathBuf;

/// A failure that the mutator loop or orchestrator must react to in a
/// specific way, rather than simply propagating.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Setup failed for an entire commit: clone, image build, or container
    /// start. Fatal for the affected commit; the worker logs and moves on.
    #[error("setup failed for commit {commit}: {source}")]
    CommitSetupFailed {
        commit: String,
        #[source]
        source: anyhow::Error,
    },

    /// A candidate's diff could not be applied to the working tree.
    /// Fatal for that candidate only.
    #[error("failed to apply patch in {path}: {source}")]
    PatchApplicationFailed {
        path: Utf8PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The test run produced a sentinel failure (timeout, apply-patch-fail,
    /// reset-failed, or an empty transcript). Treated as "no information":
    /// candidate skipped, but a baseline failure aborts the whole commit.
    #[error("test run produced no usable status: {0}")]
    SentinelFailure(SentinelReason),

    /// The container's working tree diverged from the recorded pre-state
    /// after a reset. Fatal for the commit; the container is torn down.
    #[error("container working tree corrupted after reset: {0}")]
    ContainerCorrupted(String),

    /// The model client exhausted its retry policy.
    #[error("model call failed after retries: {0}")]
    ModelUnavailable(String),
}

/// Why a test run produced no usable [`crate::status::TestStatus`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SentinelReason {
    ApplyPatchFailed,
    ResetFailed,
    TestsErrored,
    TestsTimedOut,
    MissingApplyConfirmation,
}

impl fmt::Display for SentinelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SentinelReason::ApplyPatchFailed => "APPLY_PATCH_FAIL",
            SentinelReason::ResetFailed => "RESET_FAILED",
            SentinelReason::TestsErrored => "TESTS_ERROR",
            SentinelReason::TestsTimedOut => "TESTS_TIMEOUT",
            SentinelReason::MissingApplyConfirmation => "missing 'applied patch' confirmation",
        };
        f.write_str(s)
    }
}

impl PipelineError {
    /// Whether this failure should abort the whole commit rather than just
    /// skipping the current candidate.
    pub fn aborts_commit(&self) -> bool {
        matches!(
            self,
            PipelineError::CommitSetupFailed { .. } | PipelineError::ContainerCorrupted(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        use crate::exit_code;
        match self {
            PipelineError::CommitSetupFailed { .. } => exit_code::CONTAINER_SETUP_FAILED,
            PipelineError::PatchApplicationFailed { .. } => exit_code::SOFTWARE,
            PipelineError::SentinelFailure(_) => exit_code::BASELINE_FAILED,
            PipelineError::ContainerCorrupted(_) => exit_code::CONTAINER_SETUP_FAILED,
            PipelineError::ModelUnavailable(_) => exit_code::MODEL_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn setup_failure_aborts_commit() {
        let err = PipelineError::CommitSetupFailed {
            commit: "abc123".into(),
            source: anyhow::anyhow!("clone failed"),
        };
        assert!(err.aborts_commit());
    }

    #[test]
    fn sentinel_failure_does_not_abort_commit() {
        let err = PipelineError::SentinelFailure(SentinelReason::TestsTimedOut);
        assert!(!err.aborts_commit());
    }

    #[test]
    fn sentinel_reason_display() {
        assert_eq!(
            SentinelReason::ApplyPatchFailed.to_string(),
            "APPLY_PATCH_FAIL"
        );
    }
}
