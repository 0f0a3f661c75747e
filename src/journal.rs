// Copyright 2025 Martin Pool

//! Per-(commit, strategy) line-delimited journals: record every survivor as
//! it's emitted, and let a restarted worker reconstruct which targets are
//! already mutated so C8's filter skips them.
//!
//! Grounded on `incremental.rs`'s `filter_by_last_positive_outcomes`: there,
//! a hash set of previously-emitted mutant hashes read from a single JSON
//! file excludes already-run mutants from the next invocation. Here the
//! same idea is spread across one append-only JSON-lines file per
//! `(commit, strategy)`, since a single run can emit survivors continuously
//! rather than all at once at process exit.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::target::StrategyTag;

/// One line of a journal file: just enough to identify the survivor and the
/// targets it touched, not the full snapshot (that's on disk as its own
/// artifact, see [`crate::repository::RepositorySnapshot`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub instance_id: String,
    pub strategy: StrategyTag,
    pub changed_target_nodeids: Vec<String>,
}

/// The journal file path for one `(commit, strategy)` pair under `run_dir`.
pub fn journal_path(run_dir: &Utf8Path, commit: &str, strategy: StrategyTag) -> Utf8PathBuf {
    run_dir.join("journal").join(format!("{commit}-{}.jsonl", strategy.as_str()))
}

/// Append one entry, creating the journal file and its parent directory if
/// needed. Each call flushes immediately: the journal's whole purpose is to
/// survive an unexpected process exit.
pub fn append_entry(path: &Utf8Path, entry: &JournalEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create journal directory {parent}"))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open journal {path}"))?;
    let line = serde_json::to_string(entry).context("serialize journal entry")?;
    writeln!(file, "{line}").with_context(|| format!("append to journal {path}"))?;
    file.flush().with_context(|| format!("flush journal {path}"))
}

/// Read every entry from one journal file, tolerating a missing file (a
/// fresh worker with nothing yet recorded) but not a malformed one.
pub fn read_entries(path: &Utf8Path) -> Result<Vec<JournalEntry>> {
    let Ok(file) = std::fs::File::open(path) else {
        return Ok(Vec::new());
    };
    let mut entries = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read line from journal {path}"))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).with_context(|| format!("parse journal line in {path}"))?);
    }
    Ok(entries)
}

/// Union of `changed_target_nodeids` across every strategy's journal for
/// `commit`, the set C8 must exclude on a resumed run.
pub fn read_already_mutated(run_dir: &Utf8Path, commit: &str) -> Result<HashSet<String>> {
    let mut already = HashSet::new();
    for strategy in [StrategyTag::EmptyFunction, StrategyTag::EmptyClass, StrategyTag::PriorityAware] {
        let path = journal_path(run_dir, commit, strategy);
        for entry in read_entries(&path)? {
            already.extend(entry.changed_target_nodeids);
        }
    }
    Ok(already)
}

/// The default per-strategy share of a commit's mutation budget.
#[derive(Debug, Clone, Copy)]
pub struct StrategyQuota {
    pub priority_aware_percent: u8,
    pub empty_class_percent: u8,
    pub empty_function_percent: u8,
}

impl Default for StrategyQuota {
    fn default() -> Self {
        StrategyQuota {
            priority_aware_percent: 10,
            empty_class_percent: 10,
            empty_function_percent: 80,
        }
    }
}

impl StrategyQuota {
    /// Split `total_mutations` across the three strategies by percentage,
    /// any remainder from integer rounding going to `EmptyFunction` since
    /// it already carries the largest share.
    pub fn split(&self, total_mutations: usize) -> Vec<(StrategyTag, usize)> {
        let priority_aware = total_mutations * self.priority_aware_percent as usize / 100;
        let empty_class = total_mutations * self.empty_class_percent as usize / 100;
        let empty_function = total_mutations.saturating_sub(priority_aware).saturating_sub(empty_class);
        vec![
            (StrategyTag::PriorityAware, priority_aware),
            (StrategyTag::EmptyClass, empty_class),
            (StrategyTag::EmptyFunction, empty_function),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_accounts_for_every_mutation() {
        let quota = StrategyQuota::default();
        let split = quota.split(100);
        let total: usize = split.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 100);
        assert_eq!(split[2].1, 80);
    }

    #[test]
    fn split_handles_small_totals_without_losing_the_remainder() {
        let quota = StrategyQuota::default();
        let split = quota.split(3);
        let total: usize = split.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn append_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let path = journal_path(&run_dir, "abc123", StrategyTag::EmptyFunction);
        append_entry(
            &path,
            &JournalEntry {
                instance_id: "org/repo-abc123-deadbeef".to_owned(),
                strategy: StrategyTag::EmptyFunction,
                changed_target_nodeids: vec!["mod.py::f".to_owned()],
            },
        )
        .unwrap();
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instance_id, "org/repo-abc123-deadbeef");
    }

    #[test]
    fn read_already_mutated_unions_across_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        append_entry(
            &journal_path(&run_dir, "c1", StrategyTag::EmptyFunction),
            &JournalEntry {
                instance_id: "i1".to_owned(),
                strategy: StrategyTag::EmptyFunction,
                changed_target_nodeids: vec!["mod.py::f".to_owned()],
            },
        )
        .unwrap();
        append_entry(
            &journal_path(&run_dir, "c1", StrategyTag::EmptyClass),
            &JournalEntry {
                instance_id: "i2".to_owned(),
                strategy: StrategyTag::EmptyClass,
                changed_target_nodeids: vec!["mod.py::C".to_owned()],
            },
        )
        .unwrap();
        let already = read_already_mutated(&run_dir, "c1").unwrap();
        assert_eq!(already, HashSet::from(["mod.py::f".to_owned(), "mod.py::C".to_owned()]));
    }

    #[test]
    fn read_entries_tolerates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let path = journal_path(&run_dir, "missing", StrategyTag::EmptyFunction);
        assert!(read_entries(&path).unwrap().is_empty());
    }
}
