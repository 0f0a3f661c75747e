// Copyright 2025 Martin Pool

//! Test-Log Parser (component C5): locate the pytest session markers in a
//! container's raw test output, hand the enclosed text to
//! [`crate::status::TestStatus::parse_test_output`], and separately extract
//! a failure excerpt to serve as the generated bug's problem statement.

use crate::status::{TestStatus, FATAL_SENTINELS};

const SESSION_START_MARKER: &str = "test session starts";
const FAILURES_MARKER: &str = "FAILURES";
const SUMMARY_MARKER: &str = "short test summary info";

/// Parse one container transcript into a [`TestStatus`].
///
/// Fatal sentinels are checked over the whole transcript, not just the
/// session body, since a crash can occur before or after pytest ever
/// starts.
pub fn parse(output: &str) -> TestStatus {
    if FATAL_SENTINELS.iter().any(|s| output.contains(s)) {
        return TestStatus::default();
    }
    let session = session_body(output).unwrap_or(output);
    TestStatus::parse_test_output(session)
}

/// The text from the `test session starts` banner to the end of the
/// transcript, or `None` if pytest never started.
fn session_body(output: &str) -> Option<&str> {
    let start = output.find(SESSION_START_MARKER)?;
    Some(&output[start..])
}

/// Extract just the failure-and-error region of the log, bounded above by
/// the `FAILURES` banner and below by the `short test summary info` banner
/// (or the end of the transcript), to serve as a generated bug's problem
/// statement.
pub fn failure_excerpt(output: &str) -> Option<String> {
    let start = output.find(FAILURES_MARKER)?;
    let rest = &output[start..];
    let end = rest.find(SUMMARY_MARKER).unwrap_or(rest.len());
    Some(rest[..end].trim().to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_output() -> String {
        format!(
            "collecting...\n\
             {SESSION_START_MARKER}\n\
             applied patch ok\n\
             t::a PASSED\n\
             t::b FAILED\n\
             \n\
             ========================= {FAILURES_MARKER} =========================\n\
             ____________________________ test_b _____________________________\n\
             AssertionError: boom\n\
             \n\
             ===================== {SUMMARY_MARKER} ======================\n\
             FAILED t::b - AssertionError: boom\n"
        )
    }

    #[test]
    fn parse_extracts_status_from_session_body() {
        let status = parse(&sample_output());
        assert!(status.passed.contains("t::a"));
        assert!(status.failed.contains("t::b"));
    }

    #[test]
    fn parse_returns_empty_on_fatal_sentinel_anywhere() {
        let output = format!("APPLY_PATCH_FAIL\n{}", sample_output());
        assert!(parse(&output).is_empty());
    }

    #[test]
    fn failure_excerpt_is_bounded_by_failures_and_summary_markers() {
        let excerpt = failure_excerpt(&sample_output()).unwrap();
        assert!(excerpt.contains("AssertionError: boom"));
        assert!(!excerpt.contains(SUMMARY_MARKER));
    }

    #[test]
    fn no_excerpt_when_there_are_no_failures() {
        let output = format!("{SESSION_START_MARKER}\napplied patch ok\nt::a PASSED\n");
        assert!(failure_excerpt(&output).is_none());
    }
}
