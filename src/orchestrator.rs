// Copyright 2025 Martin Pool

//! Per-Commit Orchestrator (component C10): sample commits, fan a worker out
//! to each one under global exec/model concurrency caps, and drive C8/C9 to
//! completion, journaling every survivor as it's produced.
//!
//! Grounded on `incremental.rs`'s "read the persisted outcome set, exclude
//! it from the next invocation" idiom (generalized here into
//! [`crate::journal::read_already_mutated`]) and `shard.rs`'s small
//! value-object idiom for the strategy quota split. The teacher itself is
//! synchronous throughout (`subprocess`, blocking I/O); this is the one
//! component that goes async, since the scheduling model is explicitly
//! commit-level OS parallelism plus cooperative concurrency for exec/model
//! calls — `tokio::task::JoinSet` for worker fan-out, `tokio::sync::Semaphore`
//! for the two global caps.

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};

use crate::artifacts::{RunDir, RunMeta};
use crate::cli::{ResumeArgs, RunArgs};
use crate::config::Config;
use crate::container::ContainerManager;
use crate::journal::{self, JournalEntry, StrategyQuota};
use crate::model::{HttpModelClient, ModelClient, ModelClientConfig};
use crate::mutator::{self, MutatorBudgets};
use crate::path::TreeRelativePathBuf;
use crate::repository::Repository;
use crate::source_transform::{class_with_path, parse_definitions, with_path};
use crate::strategy::{empty_class::EmptyClassStrategy, empty_function::EmptyFunctionStrategy, priority_aware::PriorityAwareStrategy, SourceFile, Strategy, StrategyContext};
use crate::target::{StrategyTag, Target};

/// Drive the full pipeline for `args.repo`: clone/open the cache, sample
/// `args.commits` base commits, and process each one under the configured
/// concurrency caps.
pub async fn run(args: &RunArgs, config: &Config) -> Result<()> {
    let run_dir = RunDir::create(&args.out)?;
    run_dir.save_run_meta(&RunMeta {
        repo_slug: args.repo.clone(),
        remote_url: args.remote_url.clone(),
        commits: args.commits,
        seed: args.seed,
        mutations_per_commit: args.mutations_per_commit,
    })?;
    run_pipeline(args, config, &run_dir, args.commits).await
}

/// Re-enter an interrupted run: the journal under `resume_args.out` already
/// names which targets are done, and `run_meta.json` (written by [`run`])
/// carries the repository identity and sampling parameters needed to
/// re-invoke the same pipeline without repeating them on the command line.
pub async fn resume(resume_args: &ResumeArgs, config: &Config) -> Result<()> {
    let run_dir = RunDir::open(&resume_args.out)?;
    let meta = run_dir.load_run_meta().with_context(|| format!("load run metadata from {}", resume_args.out))?;
    let args = RunArgs {
        repo: meta.repo_slug,
        remote_url: meta.remote_url,
        commits: meta.commits,
        seed: meta.seed,
        out: resume_args.out.clone(),
        mutations_per_commit: meta.mutations_per_commit,
    };
    run_pipeline(&args, config, &run_dir, args.commits).await
}

async fn run_pipeline(args: &RunArgs, config: &Config, run_dir: &RunDir, commit_count: usize) -> Result<()> {
    let cache_path = cache_path_for(&args.repo);
    let remote_url = args
        .remote_url
        .clone()
        .unwrap_or_else(|| format!("https://github.com/{}.git", args.repo));
    // Clone/open first so `known_commits_from_log` has a repository to walk.
    let _ = Repository::open_or_clone(&args.repo, &remote_url, &cache_path, Vec::new())
        .with_context(|| format!("open or clone {}", args.repo))?;
    let known_commits = known_commits_from_log(&cache_path)?;
    let repository = Repository::open_or_clone(&args.repo, &remote_url, &cache_path, known_commits)
        .with_context(|| format!("open or clone {}", args.repo))?;
    let commits = repository.sample_known_commits(commit_count, args.seed);
    if commits.is_empty() {
        warn!(repo = %args.repo, "no known commits to sample, nothing to do");
        return Ok(());
    }

    let container_manager = Arc::new(ContainerManager::connect(None, None).context("connect to container runtime")?);
    let model_client: Arc<dyn ModelClient> = Arc::new(
        HttpModelClient::new(ModelClientConfig {
            endpoint: config.model.endpoint.clone(),
            model_id: config.model.model_id.clone(),
            api_key: env::var("SWEMUTATE_MODEL_API_KEY").ok(),
            max_retries: config.model.max_retries,
            request_timeout: config.model_request_timeout(),
        })
        .context("build model client")?,
    );

    let exec_semaphore = Arc::new(Semaphore::new(config.concurrency.exec_concurrency));
    let model_semaphore = Arc::new(Semaphore::new(config.concurrency.model_concurrency));
    let run_dir = Arc::new(run_dir.path().to_owned());

    let monitor_handle = spawn_monitor(exec_semaphore.clone(), model_semaphore.clone());

    let mut workers = JoinSet::new();
    for commit in commits {
        let repo_slug = args.repo.clone();
        let cache_path = cache_path.clone();
        let container_manager = container_manager.clone();
        let model_client = model_client.clone();
        let exec_semaphore = exec_semaphore.clone();
        let model_semaphore = model_semaphore.clone();
        let run_dir = run_dir.clone();
        let mutations_per_commit = args.mutations_per_commit;
        let seed = args.seed;
        let callgraph_timeout = config.callgraph_timeout();
        let budgets = MutatorBudgets {
            max_iterations: config.budgets.max_iterations,
            max_mutations: config.budgets.max_mutations,
            max_cost: config.budgets.max_cost,
        };

        workers.spawn(
            async move {
                let outcome = process_commit(CommitJob {
                    repo_slug: repo_slug.clone(),
                    cache_path,
                    commit: commit.clone(),
                    container_manager,
                    model_client,
                    exec_semaphore,
                    model_semaphore,
                    run_dir,
                    mutations_per_commit,
                    seed,
                    timeout: callgraph_timeout,
                    budgets,
                })
                .await;
                if let Err(e) = outcome {
                    warn!(commit = %commit, error = %e, "commit processing failed, skipping");
                }
            }
            .instrument(info_span!("commit", commit = %commit)),
        );
    }

    while workers.join_next().await.is_some() {}
    monitor_handle.abort();
    Ok(())
}

struct CommitJob {
    repo_slug: String,
    cache_path: Utf8PathBuf,
    commit: String,
    container_manager: Arc<ContainerManager>,
    model_client: Arc<dyn ModelClient>,
    exec_semaphore: Arc<Semaphore>,
    model_semaphore: Arc<Semaphore>,
    run_dir: Arc<Utf8PathBuf>,
    mutations_per_commit: usize,
    seed: u64,
    timeout: Duration,
    budgets: MutatorBudgets,
}

async fn process_commit(job: CommitJob) -> Result<()> {
    let _exec_permit = job.exec_semaphore.acquire().await.context("acquire exec permit")?;

    let worker_dir = tempfile::tempdir().context("create worker tempdir")?;
    let worker_path = Utf8Path::from_path(worker_dir.path()).context("worker tempdir is not utf8")?;
    let repository = Repository::open_or_clone(&job.repo_slug, "", &job.cache_path, Vec::new())?;
    let worktree = repository.clone_worker_tree(worker_path)?;
    worktree.checkout(&job.commit).context("checkout base commit")?;

    let image_tag = format!("{}:latest", job.repo_slug);
    job.container_manager
        .pull_image(&image_tag)
        .await
        .with_context(|| format!("pull image {image_tag}"))?;
    let container_name = format!("swemutate-{}-{}", sanitize(&job.repo_slug), &job.commit[..job.commit.len().min(12)]);
    let container = job
        .container_manager
        .start_container(&image_tag, &container_name)
        .await
        .context("start container")?;

    let repo_dir = Utf8Path::new("/testbed");
    let result = run_commit_in_container(&job, &container, repo_dir, &repository, &worktree).await;
    if let Err(e) = container.remove().await {
        warn!(error = %e, "failed to remove container");
    }
    result
}

async fn run_commit_in_container(
    job: &CommitJob,
    container: &crate::container::Container,
    repo_dir: &Utf8Path,
    repository: &Repository,
    worktree: &crate::repository::WorkingTree,
) -> Result<()> {
    let (baseline_status, call_graph) = mutator::baseline(container, &job.container_manager, repo_dir, job.timeout)
        .await
        .context("baseline run")?;
    let already_mutated = journal::read_already_mutated(&job.run_dir, &job.commit)?;
    let pristine = crate::repository::RepositorySnapshot::pristine(job.repo_slug.clone(), job.commit.clone(), None);
    let sources = collect_sources(worktree.path())?;

    let quota = StrategyQuota::default();
    let split = quota.split(job.mutations_per_commit);
    for (tag, budget) in split {
        if budget == 0 {
            continue;
        }
        let _model_permit = job.model_semaphore.acquire().await.context("acquire model permit")?;
        let already_mutated_for_strategy: HashSet<String> = already_mutated.clone();
        let strategy: Box<dyn Strategy> = match tag {
            StrategyTag::EmptyFunction => Box::new(EmptyFunctionStrategy),
            StrategyTag::EmptyClass => Box::new(EmptyClassStrategy),
            StrategyTag::PriorityAware => Box::new(PriorityAwareStrategy { seed: job.seed }),
        };
        let ctx = StrategyContext {
            container,
            repo_dir,
            model: job.model_client.as_ref(),
            call_graph: &call_graph,
            pristine_status: &baseline_status,
            already_mutated: &already_mutated_for_strategy,
            exec_timeout: job.timeout,
            model_name: "swemutate-worker".to_owned(),
        };
        let mutator_budgets = MutatorBudgets {
            max_mutations: budget.min(job.budgets.max_mutations),
            ..job.budgets
        };

        let survivors = mutator::run(
            container,
            worktree,
            &pristine,
            strategy.as_ref(),
            &ctx,
            &baseline_status,
            mutator_budgets,
            &sources,
            job.timeout,
        )
        .await
        .with_context(|| format!("mutator loop for strategy {:?}", tag))?;

        for survivor in &survivors {
            let snapshot_path = run_dir_save(&job.run_dir, survivor)?;
            let nodeids = survivor
                .mutation_info
                .as_ref()
                .map(|info| info.changed_target_nodeids())
                .unwrap_or_default();
            let entry = JournalEntry {
                instance_id: survivor.instance_id(),
                strategy: tag,
                changed_target_nodeids: nodeids,
            };
            let path = journal::journal_path(&job.run_dir, &job.commit, tag);
            journal::append_entry(&path, &entry)?;
            info!(instance_id = %entry.instance_id, path = %snapshot_path, "recorded survivor");
        }
    }

    let _ = repository;
    Ok(())
}

fn run_dir_save(run_dir: &Utf8Path, snapshot: &crate::repository::RepositorySnapshot) -> Result<Utf8PathBuf> {
    let run_dir = RunDir::open(run_dir)?;
    run_dir.save_snapshot(snapshot)
}

/// Dry-run C8's target discovery over a local checkout, without a
/// container or a model: every function and class a strategy could
/// propose a mutation for, optionally restricted to one file.
pub fn list_mutants(repo_dir: &Utf8Path, only_file: Option<&Utf8Path>) -> Result<Vec<Target>> {
    let mut sources = collect_sources(repo_dir)?;
    if let Some(only_file) = only_file {
        sources.retain(|s| s.relative_path.as_utf8_path() == only_file);
    }
    let mut targets = Vec::new();
    for source in &sources {
        let (functions, classes) = parse_definitions(&source.text)?;
        for function in functions {
            targets.push(with_path(function, &source.relative_path).target);
        }
        for class in classes {
            let class = class_with_path(class, &source.relative_path);
            targets.push(class.target.clone());
            for method in &class.methods {
                targets.push(method.target.clone());
            }
        }
    }
    Ok(targets)
}

/// Read every non-test Python source file in `worktree_root` into a
/// [`SourceFile`], the shape C8's strategies parse targets out of.
fn collect_sources(worktree_root: &Utf8Path) -> Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for entry in walkdir::WalkDir::new(worktree_root).sort_by_file_name() {
        let entry = entry.context("walk worktree")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path()).context("worktree path is not utf8")?;
        if path.extension() != Some("py") {
            continue;
        }
        let relative = path.strip_prefix(worktree_root).context("strip worktree prefix")?;
        let relative = TreeRelativePathBuf::from(relative);
        if relative.contains_component_with("test") {
            continue;
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        sources.push(SourceFile { relative_path: relative, text });
    }
    Ok(sources)
}

/// Log semaphore occupancy on a fixed interval, the "Recovery"-facing
/// observability requirement: a stuck worker holding a permit shows up as a
/// stalled available-permit count rather than silence.
fn spawn_monitor(exec_semaphore: Arc<Semaphore>, model_semaphore: Arc<Semaphore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            info!(
                exec_available = exec_semaphore.available_permits(),
                model_available = model_semaphore.available_permits(),
                "orchestrator concurrency snapshot"
            );
        }
    })
}

fn cache_path_for(repo_slug: &str) -> Utf8PathBuf {
    let cache_root = env::var("SWEMUTATE_CACHE_DIR").unwrap_or_else(|_| ".swemutate-cache".to_owned());
    Utf8PathBuf::from(cache_root).join(sanitize(repo_slug))
}

fn sanitize(slug: &str) -> String {
    slug.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// The commits `sample_known_commits` draws from: the cache clone's own
/// history on its current HEAD, newest first. No manifest of
/// already-validated base commits is assumed to exist ahead of time, unlike
/// `original_source/`'s `swesynth`, which reads a precomputed dataset split;
/// here the orchestrator is the thing that builds that split.
fn known_commits_from_log(cache_path: &Utf8Path) -> Result<Vec<String>> {
    let repo = git2::Repository::open(cache_path).with_context(|| format!("open cache clone {cache_path}"))?;
    let mut revwalk = repo.revwalk().context("create revwalk")?;
    revwalk.push_head().context("push HEAD onto revwalk")?;
    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid.context("read commit oid")?;
        commits.push(oid.to_string());
    }
    Ok(commits)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitize_replaces_non_alphanumeric() {
        assert_eq!(sanitize("owner/name"), "owner_name");
    }

    #[test]
    fn cache_path_is_scoped_per_repo() {
        let path = cache_path_for("owner/name");
        assert!(path.as_str().ends_with("owner_name"));
    }
}
