//! Docker Engine API gateway backed by bollard

use super::{demux_frames, DaemonGateway};
use crate::error::{DaemonError, DaemonResult};
use crate::models::{DaemonInfo, ExecOutput, ImageRef, PortBinding, RawContainer};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogOutput, LogsOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{ListImagesOptions, RemoveImageOptions};
use bollard::models::ContainerSummary;
use bollard::Docker;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Seconds before a daemon request is abandoned
const DAEMON_TIMEOUT_SECS: u64 = 120;

/// Gateway to a local Docker daemon
///
/// Construction never fails: if the client cannot be built the gateway keeps
/// the reason and reports it as `Unavailable` from every call.
#[derive(Clone)]
pub struct DockerGateway {
    docker: Result<Docker, String>,
}

impl DockerGateway {
    /// Connect to an explicit socket (unix socket or named pipe), or to the
    /// platform defaults when `socket` is `None`
    pub fn connect(socket: Option<&str>) -> Self {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, DAEMON_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        };

        match docker {
            Ok(docker) => {
                info!(socket = ?socket, "Container daemon client created");
                Self { docker: Ok(docker) }
            }
            Err(e) => {
                warn!(socket = ?socket, error = %e, "Could not create container daemon client");
                Self {
                    docker: Err(e.to_string()),
                }
            }
        }
    }

    fn client(&self) -> DaemonResult<&Docker> {
        self.docker
            .as_ref()
            .map_err(|e| DaemonError::Unavailable(e.clone()))
    }

    fn translate_container(summary: ContainerSummary) -> RawContainer {
        let mut ports: Vec<PortBinding> = Vec::new();
        for port in summary.ports.unwrap_or_default() {
            let binding = PortBinding {
                container_port: port.private_port,
                host_port: port.public_port,
            };
            // IPv4 and IPv6 listeners are reported as separate entries
            if !ports.contains(&binding) {
                ports.push(binding);
            }
        }

        RawContainer {
            id: summary.id.unwrap_or_default(),
            names: summary.names.unwrap_or_default(),
            image: summary.image.unwrap_or_default(),
            state: summary.state.unwrap_or_default(),
            status: summary.status.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default().into_iter().collect(),
            ports,
        }
    }
}

fn append_output(out: &mut Vec<u8>, chunk: LogOutput) {
    match chunk {
        LogOutput::Console { message } => out.extend(demux_frames(&message)),
        LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
            out.extend_from_slice(&message)
        }
        LogOutput::StdIn { .. } => {}
    }
}

#[async_trait]
impl DaemonGateway for DockerGateway {
    async fn list_all_containers(&self) -> DaemonResult<Vec<RawContainer>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.client()?.list_containers(Some(options)).await?;
        debug!(count = containers.len(), "Listed containers");

        Ok(containers
            .into_iter()
            .map(Self::translate_container)
            .collect())
    }

    async fn list_images(&self) -> DaemonResult<Vec<ImageRef>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self.client()?.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|image| ImageRef {
                id: image.id,
                tags: image
                    .repo_tags
                    .into_iter()
                    .filter(|t| t != "<none>:<none>")
                    .collect(),
                size_bytes: image.size,
            })
            .collect())
    }

    async fn container_logs(&self, id: &str, tail: usize) -> DaemonResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = Box::pin(self.client()?.logs(id, Some(options)));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            append_output(&mut out, chunk?);
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> DaemonResult<ExecOutput> {
        let docker = self.client()?;
        let exec = docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(argv.to_vec()),
                    ..Default::default()
                },
            )
            .await?;

        let mut out = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                append_output(&mut out, chunk?);
            }
        }

        let inspect = docker.inspect_exec(&exec.id).await?;

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&out).into_owned(),
            exit_code: inspect.exit_code,
        })
    }

    async fn remove_image(&self, image: &str, force: bool) -> DaemonResult<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };

        self.client()?
            .remove_image(image, Some(options), None)
            .await?;
        Ok(())
    }

    async fn daemon_info(&self) -> DaemonInfo {
        let docker = match self.client() {
            Ok(docker) => docker,
            Err(e) => {
                return DaemonInfo {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };

        match docker.info().await {
            Ok(info) => DaemonInfo {
                connected: true,
                version: info.server_version,
                containers: info.containers.unwrap_or(0),
                containers_running: info.containers_running.unwrap_or(0),
                images: info.images.unwrap_or(0),
                platform: match (info.os_type, info.architecture) {
                    (Some(os), Some(arch)) => Some(format!("{}/{}", os, arch)),
                    (os, _) => os,
                },
                error: None,
            },
            Err(e) => DaemonInfo {
                error: Some(DaemonError::from(e).to_string()),
                ..Default::default()
            },
        }
    }
}
