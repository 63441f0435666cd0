//! Remote staging transport and container control
//!
//! Used only when a worker executes inside an isolated container: inputs
//! are pushed before the engine reads them, and produced artifacts are
//! pulled afterwards. Pulls retry on a fixed interval with a bounded
//! attempt count, because the engine-side write can race the transfer; a
//! file that never appears is reported as an error instead of hanging the
//! whole machine.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::query_parameters::{
    CreateContainerOptions, DownloadFromContainerOptionsBuilder, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptionsBuilder,
};
use bollard::models::ContainerCreateBody;
use bollard::Docker;
use futures::TryStreamExt;

use crate::config::MachineOptions;
use crate::error::{Error, Result};
use crate::index::GeometryIndex;

/// Run `op` up to `attempts` times, sleeping `interval` between attempts.
///
/// This is the one place in the orchestrator with an explicit bounded wait;
/// everything else blocks until the engine answers.
pub async fn with_retry<T, F, Fut>(attempts: usize, interval: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(attempt, "Retryable operation failed: {e}");
                last = Some(e);
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(last.unwrap_or_else(|| Error::Staging("retry budget of zero attempts".into())))
}

/// Drive one pull within the bounded retry budget. Whatever the transport
/// reported on the last attempt, an exhausted budget means the engine never
/// produced the file; that is the error the caller needs to see.
async fn pull_with_budget<F, Fut>(
    attempts: usize,
    interval: Duration,
    remote: &Path,
    fetch: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    with_retry(attempts, interval, fetch)
        .await
        .map_err(|_| Error::StagedFileMissing {
            path: remote.to_path_buf(),
            attempts,
        })
}

/// Lifecycle control for one worker's engine container.
pub struct ContainerControl {
    docker: Docker,
    id: String,
    name: String,
}

impl ContainerControl {
    /// Create and start a container from `image`, waiting for it to reach
    /// the running state.
    pub async fn create(docker: Docker, name: &str, image: &str) -> Result<Self> {
        tracing::info!(container = %name, image = %image, "Creating engine container");

        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            // The engine is started via its own launcher; the container
            // just has to stay up.
            cmd: Some(vec!["tail".into(), "-f".into(), "/dev/null".into()]),
            tty: Some(false),
            ..Default::default()
        };
        let response = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.to_string()),
                    platform: String::new(),
                }),
                body,
            )
            .await
            .map_err(|e| Error::Staging(format!("Failed to create container '{name}': {e}")))?;

        let control = Self {
            docker,
            id: response.id,
            name: name.to_string(),
        };
        control.start().await?;
        Ok(control)
    }

    /// Container id, as needed to scope a [`ContainerStaging`].
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        self.docker
            .start_container(&self.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| Error::Staging(format!("Failed to start container '{}': {e}", self.name)))?;

        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        loop {
            let inspect = self
                .docker
                .inspect_container(&self.id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| Error::Staging(format!("Failed to inspect container: {e}")))?;
            if let Some(state) = inspect.state {
                if state.running == Some(true) {
                    tracing::info!(container = %self.name, "Engine container is running");
                    return Ok(());
                }
            }
            if std::time::Instant::now() > deadline {
                return Err(Error::Staging(format!(
                    "Container '{}' failed to start within 30s",
                    self.name
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Stop and remove the container. Tolerant of a container that is
    /// already gone; teardown must never make shutdown worse.
    pub async fn teardown(&self) {
        tracing::info!(container = %self.name, "Tearing down engine container");
        if let Err(e) = self
            .docker
            .stop_container(
                &self.id,
                Some(StopContainerOptions {
                    t: Some(10),
                    signal: None,
                }),
            )
            .await
        {
            tracing::warn!(container = %self.name, "Error stopping container: {e}");
        }
        if let Err(e) = self
            .docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: false,
                    v: true,
                    link: false,
                }),
            )
            .await
        {
            tracing::warn!(container = %self.name, "Error removing container: {e}");
        }
    }
}

/// File staging into and out of one worker's container.
pub struct ContainerStaging {
    docker: Docker,
    container_id: String,
    remote_root: String,
    pull_attempts: usize,
    pull_interval: Duration,
}

impl ContainerStaging {
    /// Staging transport scoped to `container_id`, with the retry budget
    /// taken from the machine options.
    pub fn new(docker: Docker, container_id: impl Into<String>, options: &MachineOptions) -> Self {
        Self {
            docker,
            container_id: container_id.into(),
            remote_root: options.remote_root.clone(),
            pull_attempts: options.pull_attempts,
            pull_interval: options.pull_interval,
        }
    }

    /// Remote path the engine sees for a staged file.
    pub fn remote_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.remote_root).join(file_name)
    }

    /// Push local files into the container's staging root, flattened to
    /// their file names.
    pub async fn push(&self, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut builder = tar::Builder::new(Vec::new());
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| Error::Staging(format!("{} has no file name", file.display())))?;
            tracing::debug!(file = %file.display(), "Staging file into container");
            builder
                .append_path_with_name(file, name)
                .map_err(|e| Error::Staging(format!("Failed to archive {}: {e}", file.display())))?;
        }
        let archive = builder
            .into_inner()
            .map_err(|e| Error::Staging(format!("Failed to finish staging archive: {e}")))?;

        let options = UploadToContainerOptionsBuilder::new()
            .path(&self.remote_root)
            .build();
        self.docker
            .upload_to_container(
                &self.container_id,
                Some(options),
                bollard::body_full(bytes::Bytes::from(archive)),
            )
            .await
            .map_err(|e| Error::Staging(format!("Failed to upload staging archive: {e}")))?;
        Ok(())
    }

    /// Push an input file together with every auxiliary file its own index
    /// names. Discovery walks the index rather than assuming a naming
    /// convention.
    pub async fn push_with_index(&self, index_file: &Path) -> Result<()> {
        let index = GeometryIndex::load(index_file)?;
        let mut files = vec![index_file.to_path_buf()];
        files.extend(index.auxiliary_files());
        self.push(&files).await
    }

    /// Pull files the engine produced into `local_dir`, retrying each one
    /// within the bounded budget to tolerate a worker-side write race.
    pub async fn pull(&self, file_names: &[String], local_dir: &Path) -> Result<()> {
        for name in file_names {
            let remote = self.remote_path(name);
            let local = local_dir.join(name);
            pull_with_budget(self.pull_attempts, self.pull_interval, &remote, || {
                self.pull_one(&remote, &local, name)
            })
            .await?;
            tracing::debug!(file = %name, "Pulled artifact from container");
        }
        Ok(())
    }

    async fn pull_one(&self, remote: &Path, local: &Path, name: &str) -> Result<()> {
        let options = DownloadFromContainerOptionsBuilder::new()
            .path(&remote.to_string_lossy())
            .build();
        let bytes: Vec<u8> = self
            .docker
            .download_from_container(&self.container_id, Some(options))
            .map_ok(|chunk| chunk.to_vec())
            .try_concat()
            .await
            .map_err(|e| Error::Staging(format!("Download of {} failed: {e}", remote.display())))?;

        let mut archive = tar::Archive::new(bytes.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| Error::Staging(format!("Bad archive for {}: {e}", remote.display())))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::Staging(format!("Bad archive entry: {e}")))?;
            let entry_name = entry
                .path()
                .map_err(|e| Error::Staging(format!("Bad archive entry path: {e}")))?
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            if entry_name.as_deref() == Some(name) {
                entry
                    .unpack(local)
                    .map_err(|e| Error::Staging(format!("Failed to unpack {name}: {e}")))?;
                return Ok(());
            }
        }
        Err(Error::Staging(format!(
            "{} not present in downloaded archive",
            remote.display()
        )))
    }
}
