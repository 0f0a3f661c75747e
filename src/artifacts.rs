// Copyright 2025 Martin Pool

//! The `--out` run directory: where validated snapshots, journals, and
//! per-instance test-log transcripts are written.
//!
//! Grounded on `output.rs`'s `OutputDir`: same rotate-existing-to-`.old`
//! convention on creation, same "one small wrapper type, not a bag of free
//! functions" shape — generalized from a single flat `log/` directory to the
//! `{repo_slug}/{version}/{base_commit}/{hash}/` tree `RepositorySnapshot`
//! already knows how to compute (`relative_artifact_dir`).

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::repository::RepositorySnapshot;
use crate::test_function_map::zstd_write;

const ROTATED_SUFFIX: &str = ".old";
const SNAPSHOT_FILE: &str = "snapshot.json";
const TRANSCRIPT_FILE: &str = "test_log_transcript.zst";
const META_FILE: &str = "run_meta.json";

/// The repository identity and sampling parameters a `run` invocation was
/// started with, persisted so `resume` can re-derive them without the
/// caller having to repeat `--repo`/`--commits`/`--seed` on the command
/// line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub repo_slug: String,
    pub remote_url: Option<String>,
    pub commits: usize,
    pub seed: u64,
    pub mutations_per_commit: usize,
}

/// A run's output directory, rotating any previous run at the same path out
/// of the way rather than silently merging into it.
#[derive(Debug)]
pub struct RunDir {
    path: Utf8PathBuf,
}

impl RunDir {
    pub fn create(path: &Utf8Path) -> Result<RunDir> {
        if path.exists() {
            let rotated = Utf8PathBuf::from(format!("{path}{ROTATED_SUFFIX}"));
            if rotated.exists() {
                fs::remove_dir_all(&rotated).with_context(|| format!("remove {rotated}"))?;
            }
            fs::rename(path, &rotated).with_context(|| format!("move {path} to {rotated}"))?;
            info!(%path, %rotated, "rotated previous run directory");
        }
        fs::create_dir_all(path).with_context(|| format!("create run directory {path}"))?;
        Ok(RunDir { path: path.to_owned() })
    }

    /// Open an existing run directory in place, for `resume`, without
    /// rotating it away.
    pub fn open(path: &Utf8Path) -> Result<RunDir> {
        fs::create_dir_all(path).with_context(|| format!("create run directory {path}"))?;
        Ok(RunDir { path: path.to_owned() })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn journal_dir(&self) -> Utf8PathBuf {
        self.path.join("journal")
    }

    pub fn save_run_meta(&self, meta: &RunMeta) -> Result<()> {
        let path = self.path.join(META_FILE);
        let json = serde_json::to_string_pretty(meta).context("serialize run meta")?;
        fs::write(&path, json).with_context(|| format!("write {path}"))
    }

    pub fn load_run_meta(&self) -> Result<RunMeta> {
        let path = self.path.join(META_FILE);
        let json = fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
        serde_json::from_str(&json).with_context(|| format!("parse run meta {path}"))
    }

    /// Persist `snapshot` as pretty-printed JSON at its instance-ID-derived
    /// path, creating parent directories as needed.
    pub fn save_snapshot(&self, snapshot: &RepositorySnapshot) -> Result<Utf8PathBuf> {
        let dir = self.path.join(snapshot.relative_artifact_dir());
        fs::create_dir_all(&dir).with_context(|| format!("create snapshot directory {dir}"))?;
        let path = dir.join(SNAPSHOT_FILE);
        let json = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
        fs::write(&path, json).with_context(|| format!("write {path}"))?;
        Ok(path)
    }

    pub fn load_snapshot(&self, relative_dir: &Utf8Path) -> Result<RepositorySnapshot> {
        let path = self.path.join(relative_dir).join(SNAPSHOT_FILE);
        let json = fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
        serde_json::from_str(&json).with_context(|| format!("parse snapshot {path}"))
    }

    /// Persist a full test-run transcript zstd-compressed, alongside the
    /// snapshot it belongs to, for later debugging without re-running the
    /// container.
    pub fn save_transcript(&self, snapshot: &RepositorySnapshot, transcript: &str) -> Result<Utf8PathBuf> {
        let dir = self.path.join(snapshot.relative_artifact_dir());
        fs::create_dir_all(&dir).with_context(|| format!("create snapshot directory {dir}"))?;
        let path = dir.join(TRANSCRIPT_FILE);
        zstd_write(&path, transcript.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_snapshot() -> RepositorySnapshot {
        RepositorySnapshot::pristine("org/repo", "abc1234", Some("1.0".to_owned()))
    }

    #[test]
    fn save_and_load_run_meta_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::create(&Utf8PathBuf::try_from(dir.path().join("out")).unwrap()).unwrap();
        let meta = RunMeta {
            repo_slug: "org/repo".to_owned(),
            remote_url: None,
            commits: 5,
            seed: 42,
            mutations_per_commit: 20,
        };
        run_dir.save_run_meta(&meta).unwrap();
        let loaded = run_dir.load_run_meta().unwrap();
        assert_eq!(loaded.repo_slug, "org/repo");
        assert_eq!(loaded.seed, 42);
    }

    #[test]
    fn save_and_load_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::create(&Utf8PathBuf::try_from(dir.path().join("out")).unwrap()).unwrap();
        let snapshot = sample_snapshot();
        run_dir.save_snapshot(&snapshot).unwrap();
        let loaded = run_dir.load_snapshot(&snapshot.relative_artifact_dir()).unwrap();
        assert_eq!(loaded.instance_id(), snapshot.instance_id());
    }

    #[test]
    fn create_rotates_an_existing_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("out")).unwrap();
        RunDir::create(&path).unwrap();
        fs::write(path.join("marker"), "first run").unwrap();
        RunDir::create(&path).unwrap();
        assert!(!path.join("marker").exists());
        let rotated = Utf8PathBuf::from(format!("{path}{ROTATED_SUFFIX}"));
        assert!(rotated.join("marker").exists());
    }

    #[test]
    fn save_transcript_writes_alongside_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::create(&Utf8PathBuf::try_from(dir.path().join("out")).unwrap()).unwrap();
        let snapshot = sample_snapshot();
        let path = run_dir.save_transcript(&snapshot, "some test output").unwrap();
        assert!(path.exists());
    }
}
