// Copyright 2025 Martin Pool

//! Container Manager (component C4): build base/env images, start one
//! long-lived container per snapshot, stream commands with timeout, copy
//! files in/out, and clean up.
//!
//! Grounded on `process.rs`/`run.rs` for the shape of a managed child
//! process with a hard wall-clock timeout (here re-targeted at a Docker
//! exec instead of a local `Popen`), `output/lock.rs` for the
//! build-coordination pattern (see [`lock::BuildLock`]), and
//! `tail_file.rs` for tailing a streamed log while a command is in flight.
//! The tracer-injection and coverage-sanitization mechanics this component
//! is invoked with come from
//! `original_source/swesynth/mutation/validator/docker/` and are
//! implemented in [`crate::callgraph`].

mod lock;

use std::io::Read;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use camino::Utf8Path;
use futures_util::StreamExt;
use tar::{Builder as TarBuilder, Header as TarHeader};
use tracing::{debug, warn};

pub use lock::{BuildLock, CallGraphLock};

/// The outcome of one `exec` call.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Finished { exit_code: i64, transcript: String },
    Timeout { transcript: String },
}

/// A single long-lived container bound to one repository snapshot's test
/// session.
pub struct Container {
    docker: Docker,
    id: String,
}

impl Container {
    /// Run `command` as a shell script inside the container, streaming
    /// stdout+stderr and enforcing `timeout`. On expiry the underlying
    /// process is sent SIGTERM via a follow-up exec against its recorded
    /// PID, matching `run.rs`'s local `terminate_child` but over the Docker
    /// exec API rather than a process group.
    pub async fn exec(&self, command: &str, name: &str, timeout: Duration) -> Result<ExecOutcome> {
        let pidfile = format!("/tmp/swemutate_{name}.pid");
        let script = format!("echo $$ > {pidfile}\nexec sh -c {command:?}\n");
        let create = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_owned(), "-c".to_owned(), script]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("create exec {name}"))?;

        let mut transcript = String::new();
        let run = async {
            match self
                .docker
                .start_exec(&create.id, None)
                .await
                .with_context(|| format!("start exec {name}"))?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        let chunk = chunk.with_context(|| format!("read exec {name} output"))?;
                        transcript.push_str(&chunk.to_string());
                    }
                }
                StartExecResults::Detached => {}
            }
            anyhow::Ok(())
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(())) => {
                let inspect = self.docker.inspect_exec(&create.id).await.with_context(|| format!("inspect exec {name}"))?;
                let exit_code = inspect.exit_code.unwrap_or(-1);
                Ok(ExecOutcome::Finished { exit_code, transcript })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(%name, "exec timed out after {timeout:?}, sending SIGTERM");
                self.terminate_by_pidfile(&pidfile).await;
                Ok(ExecOutcome::Timeout { transcript })
            }
        }
    }

    async fn terminate_by_pidfile(&self, pidfile: &str) {
        let kill_script = format!("kill -TERM $(cat {pidfile}) 2>/dev/null || true");
        if let Ok(create) = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_owned(), "-c".to_owned(), kill_script]),
                    ..Default::default()
                },
            )
            .await
        {
            let _ = self.docker.start_exec(&create.id, None).await;
        }
    }

    /// Write `contents` to `path_in_container` by streaming a single-file
    /// tar archive, the file-exchange mechanism the Docker Engine API
    /// actually exposes.
    pub async fn copy_in(&self, path_in_container: &str, contents: &[u8]) -> Result<()> {
        let tar_bytes = build_single_file_tar(path_in_container, contents)?;
        self.docker
            .upload_to_container(
                &self.id,
                Some(UploadToContainerOptions {
                    path: "/".to_owned(),
                    ..Default::default()
                }),
                Bytes::from(tar_bytes).into(),
            )
            .await
            .context("upload file to container")
    }

    /// Stream a tar archive out of the container and return the text of
    /// its single expected member — used to retrieve the tracer's dump
    /// file.
    pub async fn read_file_from_container(&self, path: &str) -> Result<String> {
        let mut stream = self.docker.download_from_container(
            &self.id,
            Some(DownloadFromContainerOptions { path: path.to_owned() }),
        );
        let mut tar_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            tar_bytes.extend_from_slice(&chunk.context("read tar stream from container")?);
        }
        let mut archive = tar::Archive::new(tar_bytes.as_slice());
        let mut entries = archive.entries().context("read tar entries")?;
        let mut entry = entries
            .next()
            .context("tar archive from container had no entries")?
            .context("read tar entry")?;
        let mut text = String::new();
        entry.read_to_string(&mut text).context("read tar entry as utf8")?;
        Ok(text)
    }

    /// Remove the container. Always called on every exit path from the
    /// snapshot's test session, per the ownership rule in the data model.
    pub async fn remove(self) -> Result<()> {
        self.docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions { force: true, ..Default::default() }),
            )
            .await
            .context("remove container")
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Build/pull images and start containers, one snapshot at a time.
pub struct ContainerManager {
    docker: Docker,
    build_lock: BuildLock,
    call_graph_lock: CallGraphLock,
    cpu_limit: Option<f64>,
    memory_limit_bytes: Option<i64>,
}

impl ContainerManager {
    pub fn connect(cpu_limit: Option<f64>, memory_limit_bytes: Option<i64>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("connect to docker daemon")?;
        Ok(ContainerManager {
            docker,
            build_lock: BuildLock::new(),
            call_graph_lock: CallGraphLock::new(),
            cpu_limit,
            memory_limit_bytes,
        })
    }

    /// Block until no other commit worker is building its call-graph map,
    /// then hold the lock for the returned guard's lifetime. Separate from
    /// the image [`BuildLock`]: the two operations don't contend with each
    /// other and a commit shouldn't wait on an unrelated image build.
    pub async fn acquire_call_graph_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.call_graph_lock.acquire().await
    }

    /// Ensure `tag` exists, building it from `dockerfile` if not already
    /// present, guarded by the process-wide build lock so two snapshots for
    /// the same repo+version never race to build it twice.
    pub async fn ensure_image(&self, tag: &str, dockerfile: &str) -> Result<()> {
        let _guard = self.build_lock.acquire().await;
        if self.docker.inspect_image(tag).await.is_ok() {
            debug!(%tag, "image already present");
            return Ok(());
        }
        let tar_bytes = build_single_file_tar("Dockerfile", dockerfile.as_bytes())?;
        let mut stream = self.docker.build_image(
            BuildImageOptions { t: tag.to_owned(), rm: true, ..Default::default() },
            None,
            Some(Bytes::from(tar_bytes).into()),
        );
        while let Some(progress) = stream.next().await {
            let progress = progress.context("build image")?;
            if let Some(error) = progress.error {
                bail!("image build failed: {error}");
            }
        }
        Ok(())
    }

    /// Pull `name:tag` from a registry rather than building locally.
    pub async fn pull_image(&self, name_and_tag: &str) -> Result<()> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions { from_image: name_and_tag.to_owned(), ..Default::default() }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.with_context(|| format!("pull image {name_and_tag}"))?;
        }
        Ok(())
    }

    /// Start one long-lived, mount-less container from `image` for the
    /// lifetime of a single snapshot's test session.
    pub async fn start_container(&self, image: &str, name: &str) -> Result<Container> {
        let host_config = HostConfig {
            nano_cpus: self.cpu_limit.map(|cpus| (cpus * 1e9) as i64),
            memory: self.memory_limit_bytes,
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions { name: name.to_owned(), platform: None }),
                Config {
                    image: Some(image.to_owned()),
                    tty: Some(true),
                    cmd: Some(vec!["sleep".to_owned(), "infinity".to_owned()]),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("create container from {image}"))?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .context("start container")?;
        Ok(Container { docker: self.docker.clone(), id: created.id })
    }
}

fn build_single_file_tar(path_in_container: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut builder = TarBuilder::new(Vec::new());
    let mut header = TarHeader::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    let path = path_in_container.trim_start_matches('/');
    builder.append_data(&mut header, path, contents).context("append tar entry")?;
    builder.into_inner().context("finish tar archive")
}

/// A scoped "git-in-docker" patch application: records the container's
/// current `git diff`, applies `patch_text`, yields control to `body`, and
/// on exit resets the container's working tree and re-applies the prior
/// diff — so one bad candidate never leaves the container in a state a
/// later candidate would inherit.
///
/// Two fallbacks are tried in order, matching the source this was
/// distilled from: `git apply --allow-empty`, then `patch --fuzz=5 -p1`.
/// A failed application is fatal for the candidate, not the container.
pub async fn with_patch_applied<T>(
    container: &Container,
    repo_dir: &Utf8Path,
    patch_text: &str,
    timeout: Duration,
    body: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let prior_diff_outcome = container
        .exec(&format!("cd {repo_dir} && git diff"), "pre-candidate-diff", timeout)
        .await?;
    let prior_diff = match prior_diff_outcome {
        ExecOutcome::Finished { transcript, .. } => transcript,
        ExecOutcome::Timeout { .. } => bail!("timed out recording container diff before applying patch"),
    };

    container.copy_in("/tmp/candidate.diff", patch_text.as_bytes()).await?;
    let apply_script = format!(
        "cd {repo_dir} && (git apply --allow-empty /tmp/candidate.diff || patch --fuzz=5 -p1 < /tmp/candidate.diff)"
    );
    match container.exec(&apply_script, "apply-candidate", timeout).await? {
        ExecOutcome::Finished { exit_code, transcript } if exit_code == 0 => {
            debug!("applied patch");
        }
        ExecOutcome::Finished { transcript, .. } => bail!("failed to apply patch: {transcript}"),
        ExecOutcome::Timeout { .. } => bail!("timed out applying patch"),
    }

    let result = body.await;

    let reset_script = format!(
        "cd {repo_dir} && git checkout -- . && git clean -fd && printf '%s' {prior_diff:?} | git apply --allow-empty -"
    );
    if let Err(e) = container.exec(&reset_script, "reset-candidate", timeout).await {
        warn!("failed to reset container working tree: {e:#}");
    }

    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_file_tar_contains_requested_bytes() {
        let tar_bytes = build_single_file_tar("a/b.txt", b"hello").unwrap();
        let mut archive = tar::Archive::new(tar_bytes.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello");
    }
}
