// Copyright 2025 Martin Pool

//! Repository Snapshot (component C3): own a git working tree pinned to a
//! base commit, apply/revert patches, and materialize instance identity.
//!
//! Grounded on
//! `original_source/swesynth/mutation/version_control/repository.py`.

use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use git2::{ApplyLocation, ApplyOptions, DiffFormat, ObjectType, ResetType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::patch;
use crate::status::TestStatusDiff;
use crate::target::MutationInfo;

/// Logical project identity, plus a local cache clone and the set of base
/// commits the orchestrator is allowed to sample from.
#[derive(Debug, Clone)]
pub struct Repository {
    pub slug: String,
    pub remote_url: String,
    /// A full, non-bare clone kept around as the "copy-on-write" source for
    /// every worker's own clone; never itself checked out to a candidate
    /// commit.
    pub cache_path: Utf8PathBuf,
    pub known_commits: Vec<String>,
}

impl Repository {
    /// Open the cache clone at `cache_path`, cloning `remote_url` into it
    /// first if it doesn't exist yet.
    pub fn open_or_clone(slug: &str, remote_url: &str, cache_path: &Utf8Path, known_commits: Vec<String>) -> Result<Self> {
        if !cache_path.join(".git").exists() {
            debug!(%remote_url, %cache_path, "cloning repository cache");
            git2::Repository::clone(remote_url, cache_path)
                .with_context(|| format!("clone {remote_url} into {cache_path}"))?;
        }
        Ok(Repository {
            slug: slug.to_owned(),
            remote_url: remote_url.to_owned(),
            cache_path: cache_path.to_owned(),
            known_commits,
        })
    }

    /// Deterministically sample `k` of the known base commits using `seed`,
    /// so repeated runs over the same repository pick the same commits.
    pub fn sample_known_commits(&self, k: usize, seed: u64) -> Vec<String> {
        let rng = fastrand::Rng::with_seed(seed);
        let mut pool = self.known_commits.clone();
        let mut sampled = Vec::with_capacity(k.min(pool.len()));
        for _ in 0..k.min(pool.len()) {
            let i = rng.usize(..pool.len());
            sampled.push(pool.remove(i));
        }
        sampled
    }

    /// Make a fresh local clone of the cache, for one worker's exclusive
    /// use. A local `git2` clone hardlinks objects where the filesystem
    /// allows it, giving the "copy-on-write from the cache" behaviour the
    /// orchestrator relies on without shelling out to `cp --reflink`.
    pub fn clone_worker_tree(&self, dest: &Utf8Path) -> Result<WorkingTree> {
        let repo = git2::Repository::clone(self.cache_path.as_str(), dest)
            .with_context(|| format!("local clone of {} into {dest}", self.cache_path))?;
        Ok(WorkingTree { repo, path: dest.to_owned() })
    }
}

/// One worker's exclusive git working tree.
pub struct WorkingTree {
    repo: git2::Repository,
    path: Utf8PathBuf,
}

impl WorkingTree {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Detach HEAD at `commit` and force-checkout, discarding any prior
    /// working-tree state.
    pub fn checkout(&self, commit: &str) -> Result<()> {
        let oid = git2::Oid::from_str(commit).with_context(|| format!("parse commit {commit}"))?;
        let object = self.repo.find_object(oid, Some(ObjectType::Commit)).with_context(|| format!("find commit {commit}"))?;
        self.repo.reset(&object, ResetType::Hard, None).with_context(|| format!("reset to {commit}"))?;
        self.repo.set_head_detached(oid).with_context(|| format!("detach head at {commit}"))?;
        Ok(())
    }

    /// Apply a unified diff to the working tree (not the index).
    pub fn apply(&self, diff_text: &str) -> Result<()> {
        let diff = git2::Diff::from_buffer(diff_text.as_bytes()).context("parse diff for application")?;
        self.repo
            .apply(&diff, ApplyLocation::WorkDir, Some(ApplyOptions::new().check(false)))
            .context("apply diff to working tree")
    }

    /// Force the working tree back to `commit`, discarding all local
    /// changes — always called on exit from a scoped acquisition, even if
    /// the closure returned an error.
    pub fn reset_hard(&self, commit: &str) -> Result<()> {
        self.checkout(commit)
    }

    /// A unified diff of `base_commit`'s tree against the current working
    /// tree.
    pub fn diff_against_base(&self, base_commit: &str) -> Result<String> {
        let oid = git2::Oid::from_str(base_commit)?;
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let diff = self.repo.diff_tree_to_workdir(Some(&tree), None)?;
        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            let origin = line.origin();
            if origin == '+' || origin == '-' || origin == ' ' {
                text.push(origin);
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(text)
    }
}

/// Run `body` with the working tree checked out at `snapshot`'s
/// `(base_commit, unstaged_diff)`, and always reset it back to
/// `base_commit` on the way out, including when `body` returns an error.
pub fn with_checkout<T>(
    worktree: &WorkingTree,
    snapshot: &RepositorySnapshot,
    body: impl FnOnce(&Utf8Path) -> Result<T>,
) -> Result<T> {
    worktree.checkout(&snapshot.base_commit)?;
    if let Some(diff) = &snapshot.unstaged_diff {
        worktree.apply(diff).context("apply snapshot's unstaged diff")?;
    }
    let result = body(worktree.path());
    if let Err(e) = worktree.reset_hard(&snapshot.base_commit) {
        warn!("failed to reset working tree after scoped checkout: {e:#}");
    }
    result
}

/// The full state of one mutation attempt against one base commit.
///
/// The *instance_id* is deterministic:
/// `{repo_slug}-{base_commit}-{hash}` where `hash = "original"` when
/// `unstaged_diff` is absent, else the first 8 hex characters of
/// SHA-256(unstaged_diff).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub repo_slug: String,
    pub base_commit: String,
    pub version: Option<String>,
    pub unstaged_diff: Option<String>,
    pub reversed_diff: Option<String>,
    pub test_status_diff: Option<TestStatusDiff>,
    pub mutation_info: Option<MutationInfo>,
    pub score: Option<f64>,
    pub test_log_excerpt: Option<String>,
}

impl RepositorySnapshot {
    pub fn pristine(repo_slug: impl Into<String>, base_commit: impl Into<String>, version: Option<String>) -> Self {
        RepositorySnapshot {
            repo_slug: repo_slug.into(),
            base_commit: base_commit.into(),
            version,
            unstaged_diff: None,
            reversed_diff: None,
            test_status_diff: None,
            mutation_info: None,
            score: None,
            test_log_excerpt: None,
        }
    }

    pub fn hash_of_diff(&self) -> String {
        match &self.unstaged_diff {
            None => "original".to_owned(),
            Some(diff) => patch::hash_prefix(diff),
        }
    }

    pub fn instance_id(&self) -> String {
        format!("{}-{}-{}", self.repo_slug, self.base_commit, self.hash_of_diff())
    }

    /// The on-disk directory holding this snapshot's artifacts, relative to
    /// a run root: `{repo_slug}/{version}/{base_commit}/{hash}/`.
    pub fn relative_artifact_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.repo_slug)
            .join(self.version.as_deref().unwrap_or("unversioned"))
            .join(&self.base_commit)
            .join(self.hash_of_diff())
    }

    /// Return a new snapshot sharing this one's repository identity but
    /// carrying `diff`/`info` as its mutation. `self` must be pristine
    /// (`unstaged_diff` is `None`).
    pub fn copy_with_changes(&self, diff: String, info: MutationInfo) -> Result<RepositorySnapshot> {
        ensure!(self.unstaged_diff.is_none(), "copy_with_changes requires a pristine snapshot");
        Ok(RepositorySnapshot {
            unstaged_diff: Some(diff),
            mutation_info: Some(info),
            ..self.clone()
        })
    }

    /// Apply `changes` on top of this snapshot's base commit, diff the
    /// result back against the base commit, and reverse it — the
    /// synthesized "gold fix" for a validated mutation.
    pub fn get_reversed_diff(&self, worktree: &WorkingTree, changes: &str) -> Result<String> {
        with_checkout(worktree, self, |_path| {
            worktree.apply(changes).context("apply candidate changes")?;
            let forward = worktree.diff_against_base(&self.base_commit)?;
            patch::reverse(&forward)
        })
    }

    /// Convert to the public task-instance shape used by downstream
    /// evaluators, swapping PASS_TO_FAIL and FAIL_TO_PASS because the
    /// reversed diff is the *fix*: what the mutation turned from pass to
    /// fail, the fix turns back from fail to pass.
    pub fn to_task_instance(&self) -> Result<TaskInstance> {
        let diff = self
            .test_status_diff
            .as_ref()
            .context("snapshot has no test_status_diff to export")?;
        Ok(TaskInstance {
            instance_id: self.instance_id(),
            repo: self.repo_slug.clone(),
            base_commit: self.base_commit.clone(),
            patch: self.reversed_diff.clone().unwrap_or_default(),
            test_status_diff: diff.swapped(),
            extra: self
                .mutation_info
                .as_ref()
                .map(|info| info.metadata.clone())
                .unwrap_or_default(),
        })
    }

    /// Inverse of [`to_task_instance`]: swap back, so
    /// `from_task_instance(&s.to_task_instance()?)` recovers `s`'s
    /// `test_status_diff`.
    pub fn from_task_instance(instance: &TaskInstance) -> TestStatusDiff {
        instance.test_status_diff.swapped()
    }
}

/// The public record shape consumed by downstream evaluators; out of scope
/// for this crate to produce beyond this conversion (§1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub instance_id: String,
    pub repo: String,
    pub base_commit: String,
    pub patch: String,
    pub test_status_diff: TestStatusDiff,
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::*;

    fn pristine() -> RepositorySnapshot {
        RepositorySnapshot::pristine("org/repo", "abc1234", Some("1.0".to_owned()))
    }

    #[test]
    fn instance_id_is_original_without_unstaged_diff() {
        assert_eq!(pristine().instance_id(), "org/repo-abc1234-original");
    }

    #[test]
    fn instance_id_is_pure_function_of_inputs() {
        let mut s1 = pristine();
        s1.unstaged_diff = Some("some diff".to_owned());
        let mut s2 = pristine();
        s2.unstaged_diff = Some("some diff".to_owned());
        assert_eq!(s1.instance_id(), s2.instance_id());
        let mut s3 = pristine();
        s3.unstaged_diff = Some("a different diff".to_owned());
        assert_ne!(s1.instance_id(), s3.instance_id());
    }

    #[test]
    fn copy_with_changes_requires_pristine_source() {
        let mut mutated = pristine();
        mutated.unstaged_diff = Some("x".to_owned());
        let info = MutationInfo {
            changed_targets: vec![],
            metadata: Default::default(),
            strategy: crate::target::StrategyTag::EmptyFunction,
            model_raw_output: String::new(),
            mutator_model_name: "test-model".to_owned(),
        };
        assert!(mutated.copy_with_changes("y".to_owned(), info).is_err());
    }

    #[test]
    fn to_task_instance_swaps_pass_to_fail_and_fail_to_pass() {
        let mut s = pristine();
        let mut diff = TestStatusDiff::default();
        diff.pass_to_fail = BTreeSet::from(["t::a".to_string()]);
        diff.fail_to_pass = BTreeSet::from(["t::b".to_string()]);
        s.test_status_diff = Some(diff.clone());
        s.reversed_diff = Some("some reversed diff".to_owned());
        let instance = s.to_task_instance().unwrap();
        assert_eq!(instance.test_status_diff.fail_to_pass, diff.pass_to_fail);
        assert_eq!(instance.test_status_diff.pass_to_fail, diff.fail_to_pass);
    }

    #[test]
    fn task_instance_round_trips_back_to_original_diff() {
        let mut s = pristine();
        let mut diff = TestStatusDiff::default();
        diff.pass_to_fail = BTreeSet::from(["t::a".to_string()]);
        s.test_status_diff = Some(diff.clone());
        s.reversed_diff = Some(String::new());
        let instance = s.to_task_instance().unwrap();
        let recovered = RepositorySnapshot::from_task_instance(&instance);
        assert_eq!(recovered, diff);
    }

    #[test]
    fn relative_artifact_dir_matches_layout() {
        let s = pristine();
        assert_eq!(s.relative_artifact_dir(), Utf8PathBuf::from("org/repo/1.0/abc1234/original"));
    }
}
