//! Benchmark unit discovery and fleet snapshots
//!
//! A full refresh scans the benchmarks directory, pulls the container and
//! image lists from the daemon exactly once, and assembles every unit in
//! parallel. All units of one refresh therefore see the same daemon poll.

mod manifest;
mod matcher;

pub use manifest::parse_manifest;
pub use matcher::{assign_containers, owning_unit, COMPOSE_PROJECT_LABEL};

use crate::auth::AuthenticatedPrincipal;
use crate::daemon::DaemonGateway;
use crate::error::{FleetError, Result};
use crate::models::{
    BenchmarkUnit, ContainerSnapshot, ImageRef, PortMap, RawContainer, UnitMetadata, UnitStatus,
};
use crate::observability::{FleetMetrics, StructuredLogger};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Manifest file names, in lookup order
pub const MANIFEST_FILES: &[&str] = &["benchmark.yaml", "benchmark.yml", "benchmark.json"];

/// Compose definition file names
pub const COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

pub const MAKEFILE: &str = "Makefile";
pub const README: &str = "README.md";

/// Where units live and how they are named
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub root: PathBuf,
    pub unit_prefix: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./benchmarks"),
            unit_prefix: "XBEN-".to_string(),
        }
    }
}

/// Numeric identifier embedded in a unit name ("XBEN-010-24" -> 10)
///
/// Digits immediately following the prefix are used; 0 when there are none.
pub fn unit_number(name: &str, prefix: &str) -> u32 {
    let rest = match name.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &name[prefix.len()..],
        _ => name,
    };

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Aggregate published ports: container port -> host ports, in container order
pub fn aggregate_ports(containers: &[ContainerSnapshot]) -> PortMap {
    let mut ports = PortMap::new();

    for container in containers {
        for binding in &container.ports {
            if let Some(host) = binding.host_port {
                ports
                    .entry(binding.container_port.to_string())
                    .or_default()
                    .push(host);
            }
        }
    }

    ports
}

/// Logs of one container owned by a unit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLogs {
    pub container: String,
    pub name: String,
    pub logs: String,
}

/// Snapshot assembly over the benchmarks directory and daemon state
pub struct FleetCatalog {
    config: CatalogConfig,
    gateway: Arc<dyn DaemonGateway>,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl FleetCatalog {
    pub fn new(config: CatalogConfig, gateway: Arc<dyn DaemonGateway>) -> Self {
        Self {
            config,
            gateway,
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("catalog"),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn DaemonGateway> {
        &self.gateway
    }

    /// Resolve a unit name to its directory, rejecting names that could
    /// escape the benchmarks root
    pub fn unit_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name.starts_with(&self.config.unit_prefix)
            && !name.contains(['/', '\\'])
            && !name.contains("..");

        if !valid {
            return Err(FleetError::InvalidUnitName(name.to_string()));
        }
        Ok(self.config.root.join(name))
    }

    /// Resolve a unit name to an existing unit directory
    pub async fn resolve_unit(&self, name: &str) -> Result<PathBuf> {
        let path = self.unit_path(name)?;
        if !fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FleetError::UnitNotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Names of all unit directories currently on disk
    pub async fn discover(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.config.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&self.config.unit_prefix) {
                continue;
            }
            // Follows symlinks, unlike DirEntry::file_type
            if fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                names.push(name);
            }
        }

        Ok(names)
    }

    /// One coherent daemon poll: a single container list and a single image list
    async fn poll_daemon(&self) -> (Option<Vec<RawContainer>>, Vec<ImageRef>) {
        let (containers, images) = tokio::join!(
            self.gateway.list_all_containers(),
            self.gateway.list_images()
        );

        let containers = match containers {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "Container list unavailable, unit status unknown");
                self.metrics.inc_daemon_errors();
                None
            }
        };
        let images = images.unwrap_or_else(|e| {
            warn!(error = %e, "Image list unavailable");
            self.metrics.inc_daemon_errors();
            Vec::new()
        });

        (containers, images)
    }

    /// Full refresh of every unit, sorted by numeric identifier
    pub async fn list_units(
        &self,
        _principal: &AuthenticatedPrincipal,
    ) -> Result<Vec<BenchmarkUnit>> {
        let start = Instant::now();
        let names = self.discover().await?;
        let (containers, images) = self.poll_daemon().await;

        let daemon_connected = containers.is_some();
        let container_count = containers.as_ref().map(|c| c.len()).unwrap_or(0);
        let mut assigned = assign_containers(&containers.unwrap_or_default(), &names);
        let images = Arc::new(images);

        let mut tasks = JoinSet::new();
        for name in names {
            let owned = assigned.remove(&name).unwrap_or_default();
            let path = self.config.root.join(&name);
            let id = unit_number(&name, &self.config.unit_prefix);
            let images = Arc::clone(&images);
            tasks.spawn(assemble_unit(name, id, path, owned, images, daemon_connected));
        }

        let mut units = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unit) => units.push(unit),
                Err(e) => warn!(error = %e, "Unit assembly task failed"),
            }
        }
        units.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));

        let elapsed = start.elapsed();
        self.metrics.observe_refresh_latency(elapsed.as_secs_f64());
        self.metrics.set_units_discovered(units.len() as i64);
        self.logger.log_refresh(
            units.len(),
            container_count,
            daemon_connected,
            elapsed.as_millis() as u64,
        );

        Ok(units)
    }

    /// Refresh a single unit
    pub async fn get_unit(
        &self,
        _principal: &AuthenticatedPrincipal,
        name: &str,
    ) -> Result<BenchmarkUnit> {
        let start = Instant::now();
        let path = self.resolve_unit(name).await?;

        // Ownership is decided against every unit so a single-unit refresh
        // claims exactly the containers a full refresh would
        let names = self.discover().await?;
        let (containers, images) = self.poll_daemon().await;
        let daemon_connected = containers.is_some();
        let owned = assign_containers(&containers.unwrap_or_default(), &names)
            .remove(name)
            .unwrap_or_default();

        let id = unit_number(name, &self.config.unit_prefix);
        let unit = assemble_unit(
            name.to_string(),
            id,
            path,
            owned,
            Arc::new(images),
            daemon_connected,
        )
        .await;

        self.metrics
            .observe_refresh_latency(start.elapsed().as_secs_f64());
        Ok(unit)
    }

    /// README contents of a unit; every failure collapses to None
    pub async fn get_readme(
        &self,
        _principal: &AuthenticatedPrincipal,
        name: &str,
    ) -> Option<String> {
        let path = self.unit_path(name).ok()?;
        fs::read_to_string(path.join(README)).await.ok()
    }

    /// Recent logs of every container owned by a unit
    pub async fn unit_logs(
        &self,
        principal: &AuthenticatedPrincipal,
        name: &str,
        tail: usize,
    ) -> Result<Vec<ContainerLogs>> {
        let unit = self.get_unit(principal, name).await?;
        if unit.status == UnitStatus::Unknown {
            // Re-issue the list call to surface the daemon error itself
            self.gateway.list_all_containers().await?;
        }

        let mut logs = Vec::with_capacity(unit.containers.len());
        for container in &unit.containers {
            let text = self.gateway.container_logs(&container.id, tail).await?;
            logs.push(ContainerLogs {
                container: container.id.clone(),
                name: container.name.clone(),
                logs: text,
            });
        }

        Ok(logs)
    }
}

async fn read_manifest(dir: &Path) -> UnitMetadata {
    for file in MANIFEST_FILES {
        if let Ok(text) = fs::read_to_string(dir.join(file)).await {
            return parse_manifest(&text);
        }
    }
    UnitMetadata::default()
}

async fn any_exists(dir: &Path, files: &[&str]) -> bool {
    for file in files {
        if fs::metadata(dir.join(file)).await.is_ok() {
            return true;
        }
    }
    false
}

/// Assemble one unit from its directory and its share of the daemon poll
async fn assemble_unit(
    name: String,
    id: u32,
    path: PathBuf,
    owned: Vec<RawContainer>,
    images: Arc<Vec<ImageRef>>,
    daemon_connected: bool,
) -> BenchmarkUnit {
    let (metadata, has_docker_compose, has_makefile) = tokio::join!(
        read_manifest(&path),
        any_exists(&path, COMPOSE_FILES),
        any_exists(&path, &[MAKEFILE])
    );

    let containers: Vec<ContainerSnapshot> = owned
        .iter()
        .map(|raw| ContainerSnapshot::from_raw(raw, &name))
        .collect();

    let status = if daemon_connected {
        UnitStatus::derive(&containers)
    } else {
        UnitStatus::Unknown
    };

    let needle = name.to_lowercase();
    let unit_images: Vec<String> = images
        .iter()
        .flat_map(|image| image.tags.iter())
        .filter(|tag| tag.to_lowercase().contains(&needle))
        .cloned()
        .collect();

    debug!(unit = %name, containers = containers.len(), status = ?status, "Unit assembled");

    BenchmarkUnit {
        ports: aggregate_ports(&containers),
        name,
        id,
        path,
        metadata,
        has_docker_compose,
        has_makefile,
        containers,
        status,
        images: unit_images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::StaticGateway;
    use crate::models::{PortBinding, RunState};

    fn snapshot(id: &str, ports: &[(u16, Option<u16>)]) -> ContainerSnapshot {
        ContainerSnapshot {
            id: id.to_string(),
            unit: "XBEN-001".to_string(),
            name: id.to_string(),
            image: String::new(),
            status: String::new(),
            state: RunState::Running,
            ports: ports
                .iter()
                .map(|(c, h)| PortBinding {
                    container_port: *c,
                    host_port: *h,
                })
                .collect(),
        }
    }

    #[test]
    fn test_unit_number() {
        assert_eq!(unit_number("XBEN-010-24", "XBEN-"), 10);
        assert_eq!(unit_number("XBEN-104-24", "XBEN-"), 104);
        assert_eq!(unit_number("xben-007", "XBEN-"), 7);
        assert_eq!(unit_number("XBEN-custom", "XBEN-"), 0);
        assert_eq!(unit_number("XBEN-", "XBEN-"), 0);
    }

    #[test]
    fn test_port_aggregation_accumulates_in_container_order() {
        let containers = vec![
            snapshot("a", &[(80, Some(8080)), (3306, None)]),
            snapshot("b", &[(80, Some(8081)), (443, Some(8443))]),
        ];

        let ports = aggregate_ports(&containers);
        assert_eq!(ports["80"], vec![8080, 8081]);
        assert_eq!(ports["443"], vec![8443]);
        // Unpublished ports contribute nothing
        assert!(!ports.contains_key("3306"));
    }

    #[test]
    fn test_unit_path_validation() {
        let catalog = FleetCatalog::new(
            CatalogConfig {
                root: PathBuf::from("/srv/benchmarks"),
                unit_prefix: "XBEN-".to_string(),
            },
            Arc::new(StaticGateway::default()),
        );

        assert_eq!(
            catalog.unit_path("XBEN-001-24").unwrap(),
            PathBuf::from("/srv/benchmarks/XBEN-001-24")
        );
        assert!(matches!(catalog.unit_path("../etc"), Err(FleetError::InvalidUnitName(_))));
        assert!(matches!(catalog.unit_path("XBEN-1/.."), Err(FleetError::InvalidUnitName(_))));
        assert!(matches!(catalog.unit_path("other"), Err(FleetError::InvalidUnitName(_))));
        assert!(matches!(catalog.unit_path(""), Err(FleetError::InvalidUnitName(_))));
    }

    fn fixture(gateway: StaticGateway) -> (tempfile::TempDir, FleetCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("XBEN-003-24");
        std::fs::create_dir(&unit).unwrap();
        std::fs::write(unit.join(README), "# Login bypass\n").unwrap();
        std::fs::write(unit.join("benchmark.json"), "{\n  \"name\": \"Login bypass\"\n}\n").unwrap();

        let catalog = FleetCatalog::new(
            CatalogConfig {
                root: dir.path().to_path_buf(),
                unit_prefix: "XBEN-".to_string(),
            },
            Arc::new(gateway),
        );
        (dir, catalog)
    }

    #[tokio::test]
    async fn test_readme_collapses_errors_to_none() {
        let (_dir, catalog) = fixture(StaticGateway::default());
        let principal = AuthenticatedPrincipal::from_session("tester");

        assert_eq!(
            catalog.get_readme(&principal, "XBEN-003-24").await.as_deref(),
            Some("# Login bypass\n")
        );
        assert_eq!(catalog.get_readme(&principal, "XBEN-004-24").await, None);
        assert_eq!(catalog.get_readme(&principal, "../../etc/passwd").await, None);
    }

    #[tokio::test]
    async fn test_unit_logs_per_owned_container() {
        let gateway = StaticGateway {
            containers: vec![
                RawContainer {
                    id: "aaaaaaaaaaaaaaaa".to_string(),
                    names: vec!["/xben-003-24-web-1".to_string()],
                    state: "running".to_string(),
                    ..Default::default()
                },
                RawContainer {
                    id: "bbbbbbbbbbbbbbbb".to_string(),
                    names: vec!["/unrelated".to_string()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let (_dir, catalog) = fixture(gateway);
        let principal = AuthenticatedPrincipal::from_session("tester");

        let logs = catalog.unit_logs(&principal, "XBEN-003-24", 50).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "xben-003-24-web-1");
        assert_eq!(logs[0].logs, "logs of aaaaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_unavailable_daemon_yields_unknown_status() {
        let (_dir, catalog) = fixture(StaticGateway {
            unavailable: true,
            ..Default::default()
        });
        let principal = AuthenticatedPrincipal::from_session("tester");

        let unit = catalog.get_unit(&principal, "XBEN-003-24").await.unwrap();
        assert_eq!(unit.status, UnitStatus::Unknown);
        assert_eq!(unit.metadata.display_name.as_deref(), Some("Login bypass"));

        let logs = catalog.unit_logs(&principal, "XBEN-003-24", 50).await;
        assert!(matches!(logs, Err(FleetError::Daemon(e)) if e.is_unavailable()));
    }
}
