//! Container daemon access
//!
//! [`DaemonGateway`] is a thin, stateless accessor over the daemon's
//! list/image/log/exec APIs. Every call is a single daemon round-trip and
//! reports failures as [`DaemonError`] values instead of panicking.

mod docker;
mod frames;

pub use docker::DockerGateway;
pub use frames::demux_frames;

use crate::error::DaemonResult;
use crate::models::{DaemonInfo, ExecOutput, ImageRef, RawContainer};
use async_trait::async_trait;

/// Accessor over the container daemon
#[async_trait]
pub trait DaemonGateway: Send + Sync {
    /// List every container, running or not, in daemon order
    async fn list_all_containers(&self) -> DaemonResult<Vec<RawContainer>>;

    /// List top-level images
    async fn list_images(&self) -> DaemonResult<Vec<ImageRef>>;

    /// Last `tail` lines of a container's stdout and stderr
    async fn container_logs(&self, id: &str, tail: usize) -> DaemonResult<String>;

    /// Run `argv` inside a container and collect its output
    async fn exec(&self, id: &str, argv: &[String]) -> DaemonResult<ExecOutput>;

    /// Remove an image by id or reference
    async fn remove_image(&self, image: &str, force: bool) -> DaemonResult<()>;

    /// Connection summary; `connected` is false when the daemon is unreachable
    async fn daemon_info(&self) -> DaemonInfo;
}

#[cfg(test)]
pub(crate) mod testing;
