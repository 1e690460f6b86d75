//! In-memory gateway for unit tests

use super::DaemonGateway;
use crate::error::{DaemonError, DaemonResult};
use crate::models::{DaemonInfo, ExecOutput, ImageRef, RawContainer};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
pub struct StaticGateway {
    pub containers: Vec<RawContainer>,
    pub images: Vec<ImageRef>,
    /// Image references whose removal is rejected
    pub undeletable: Vec<String>,
    pub unavailable: bool,
    pub removed: Mutex<Vec<String>>,
}

impl StaticGateway {
    fn check(&self) -> DaemonResult<()> {
        if self.unavailable {
            Err(DaemonError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonGateway for StaticGateway {
    async fn list_all_containers(&self) -> DaemonResult<Vec<RawContainer>> {
        self.check()?;
        Ok(self.containers.clone())
    }

    async fn list_images(&self) -> DaemonResult<Vec<ImageRef>> {
        self.check()?;
        Ok(self.images.clone())
    }

    async fn container_logs(&self, id: &str, _tail: usize) -> DaemonResult<String> {
        self.check()?;
        Ok(format!("logs of {}", id))
    }

    async fn exec(&self, _id: &str, argv: &[String]) -> DaemonResult<ExecOutput> {
        self.check()?;
        Ok(ExecOutput {
            output: argv.join(" "),
            exit_code: Some(0),
        })
    }

    async fn remove_image(&self, image: &str, _force: bool) -> DaemonResult<()> {
        self.check()?;
        if self.undeletable.iter().any(|i| i == image) {
            return Err(DaemonError::Api {
                status: 409,
                message: format!("image {} is in use", image),
            });
        }
        self.removed.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn daemon_info(&self) -> DaemonInfo {
        DaemonInfo {
            connected: !self.unavailable,
            ..Default::default()
        }
    }
}
