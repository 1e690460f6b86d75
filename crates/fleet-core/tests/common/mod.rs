//! Shared fixtures for fleet integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_core::{
    AuthenticatedPrincipal, DaemonError, DaemonGateway, DaemonInfo, ExecOutput, ImageRef,
    RawContainer,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory daemon that counts round-trips
#[derive(Default)]
pub struct StubGateway {
    pub containers: Vec<RawContainer>,
    pub images: Vec<ImageRef>,
    pub unavailable: bool,
    pub container_list_calls: AtomicUsize,
    pub image_list_calls: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
}

impl StubGateway {
    fn check(&self) -> Result<(), DaemonError> {
        if self.unavailable {
            Err(DaemonError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    pub fn container_list_calls(&self) -> usize {
        self.container_list_calls.load(Ordering::SeqCst)
    }

    pub fn image_list_calls(&self) -> usize {
        self.image_list_calls.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonGateway for StubGateway {
    async fn list_all_containers(&self) -> Result<Vec<RawContainer>, DaemonError> {
        self.container_list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.containers.clone())
    }

    async fn list_images(&self) -> Result<Vec<ImageRef>, DaemonError> {
        self.image_list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.images.clone())
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<String, DaemonError> {
        self.check()?;
        Ok(format!("{} lines of {}", tail, id))
    }

    async fn exec(&self, _id: &str, argv: &[String]) -> Result<ExecOutput, DaemonError> {
        self.check()?;
        Ok(ExecOutput {
            output: argv.join(" "),
            exit_code: Some(0),
        })
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<(), DaemonError> {
        self.check()?;
        self.removed.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn daemon_info(&self) -> DaemonInfo {
        DaemonInfo {
            connected: !self.unavailable,
            version: Some("24.0.7".to_string()),
            containers: self.containers.len() as i64,
            images: self.images.len() as i64,
            ..Default::default()
        }
    }
}

pub fn principal() -> AuthenticatedPrincipal {
    AuthenticatedPrincipal::from_session("integration-test")
}

pub fn container(id: &str, name: &str, state: &str) -> RawContainer {
    RawContainer {
        id: id.to_string(),
        names: vec![format!("/{}", name)],
        image: format!("{}:latest", name),
        state: state.to_string(),
        status: if state == "running" {
            "Up 5 minutes".to_string()
        } else {
            "Exited (0) 1 minute ago".to_string()
        },
        ..Default::default()
    }
}

pub fn image(id: &str, tag: &str) -> ImageRef {
    ImageRef {
        id: id.to_string(),
        tags: vec![tag.to_string()],
        size_bytes: 1024,
    }
}

/// Create a unit directory with a compose file and manifest
pub fn write_unit(root: &Path, name: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("docker-compose.yml"),
        "services:\n  web:\n    build: ./app\n    ports:\n      - \"80\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("benchmark.yaml"),
        format!("name: {}\nlevel: 1\ntags: [xss]\n", name),
    )
    .unwrap();
}
