//! Lifecycle operations on benchmark units
//!
//! Every operation spawns exactly one compose subprocess in the unit
//! directory, streams its output to a caller-supplied [`LogSink`] and
//! reports a single [`OperationOutcome`]. Failures are never retried.
//!
//! Operations on the same unit race at the daemon level; callers serialise
//! them with [`UnitLocks`]. Operations on different units are independent.

mod process;
mod sink;

pub use process::{run_streaming, EnvOverlay, ExitReport};
pub use sink::{ChannelSink, LogLine, LogSink, MemorySink, OperationEvent, Stream, TracingSink};

use crate::auth::AuthenticatedPrincipal;
use crate::catalog::FleetCatalog;
use crate::error::Result;
use crate::models::PortMap;
use crate::observability::{FleetMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Requested transition of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Build,
    Start,
    Stop,
    Restart,
    RemoveImages,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Build => "build",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::RemoveImages => "remove-images",
        }
    }

    /// Compose subcommand and flags; empty for operations that talk to the
    /// daemon directly
    pub fn compose_args(&self) -> &'static [&'static str] {
        match self {
            Operation::Build => &["build", "--no-cache"],
            Operation::Start => &["up", "-d"],
            Operation::Stop => &["down"],
            Operation::Restart => &["restart"],
            Operation::RemoveImages => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion record of one operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub operation: Operation,
    pub unit: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Published ports after a successful start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,
    /// Image references removed by remove-images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<Vec<String>>,
    pub finished_at: DateTime<Utc>,
}

impl OperationOutcome {
    pub fn succeeded(operation: Operation, unit: &str) -> Self {
        Self {
            operation,
            unit: unit.to_string(),
            success: true,
            error: None,
            ports: None,
            deleted: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(operation: Operation, unit: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(operation, unit)
        }
    }
}

/// How compose is invoked
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Program followed by leading arguments, e.g. `["docker", "compose"]`
    pub compose_command: Vec<String>,
    /// Variable carrying a host port override into `start`
    pub port_env_var: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            port_env_var: "PORT".to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Build from a whitespace-separated command line
    pub fn from_command_line(command: &str, port_env_var: impl Into<String>) -> Self {
        Self {
            compose_command: command.split_whitespace().map(String::from).collect(),
            port_env_var: port_env_var.into(),
        }
    }
}

/// Per-unit mutual exclusion for lifecycle operations
#[derive(Debug, Clone, Default)]
pub struct UnitLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `unit`; released when the guard drops
    pub async fn acquire(&self, unit: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(unit.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Whether an operation currently holds `unit`
    pub fn is_busy(&self, unit: &str) -> bool {
        self.locks
            .get(unit)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Executes lifecycle operations as supervised compose subprocesses
pub struct LifecycleController {
    catalog: Arc<FleetCatalog>,
    config: LifecycleConfig,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl LifecycleController {
    pub fn new(catalog: Arc<FleetCatalog>, config: LifecycleConfig) -> Self {
        Self {
            catalog,
            config,
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("lifecycle"),
        }
    }

    /// Build every service image from scratch with the classic builder
    pub async fn build(
        &self,
        principal: &AuthenticatedPrincipal,
        unit: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        let env = EnvOverlay::new()
            .with("DOCKER_BUILDKIT", "0")
            .with("COMPOSE_DOCKER_CLI_BUILD", "0");
        self.run_compose(principal, Operation::Build, unit, env, sink)
            .await
    }

    /// Start the unit's services, then report the published ports
    pub async fn start(
        &self,
        principal: &AuthenticatedPrincipal,
        unit: &str,
        host_port: Option<u16>,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        let env = match host_port {
            Some(port) => EnvOverlay::new().with(&self.config.port_env_var, port.to_string()),
            None => EnvOverlay::new(),
        };
        self.run_compose(principal, Operation::Start, unit, env, sink)
            .await
    }

    pub async fn stop(
        &self,
        principal: &AuthenticatedPrincipal,
        unit: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        self.run_compose(principal, Operation::Stop, unit, EnvOverlay::new(), sink)
            .await
    }

    pub async fn restart(
        &self,
        principal: &AuthenticatedPrincipal,
        unit: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        self.run_compose(principal, Operation::Restart, unit, EnvOverlay::new(), sink)
            .await
    }

    /// Force-remove every image whose reference contains the unit name.
    ///
    /// A failed removal is logged and skipped; `deleted` lists what went.
    pub async fn remove_images(
        &self,
        _principal: &AuthenticatedPrincipal,
        unit: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        self.catalog.unit_path(unit)?;
        let started = Instant::now();
        let gateway = self.catalog.gateway();

        let images = match gateway.list_images().await {
            Ok(images) => images,
            Err(e) => {
                self.metrics.inc_daemon_errors();
                let outcome = OperationOutcome::failed(Operation::RemoveImages, unit, e.to_string());
                return Ok(self.finish(outcome, started));
            }
        };

        let needle = unit.to_lowercase();
        let mut deleted = Vec::new();

        for image in &images {
            for tag in image
                .tags
                .iter()
                .filter(|t| t.to_lowercase().contains(&needle))
            {
                match gateway.remove_image(tag, true).await {
                    Ok(()) => {
                        sink.line(LogLine::stdout(format!("Deleted: {}", tag)));
                        deleted.push(tag.clone());
                    }
                    Err(e) => {
                        warn!(unit = %unit, image = %tag, error = %e, "Image removal failed, skipping");
                        sink.line(LogLine::stderr(format!("Failed to remove {}: {}", tag, e)));
                    }
                }
            }
        }

        let mut outcome = OperationOutcome::succeeded(Operation::RemoveImages, unit);
        outcome.deleted = Some(deleted);
        Ok(self.finish(outcome, started))
    }

    async fn run_compose(
        &self,
        principal: &AuthenticatedPrincipal,
        operation: Operation,
        unit: &str,
        env: EnvOverlay,
        sink: Arc<dyn LogSink>,
    ) -> Result<OperationOutcome> {
        let dir = self.catalog.resolve_unit(unit).await?;
        let started = Instant::now();

        let Some((program, leading)) = self.config.compose_command.split_first() else {
            let outcome = OperationOutcome::failed(operation, unit, "compose command is empty");
            return Ok(self.finish(outcome, started));
        };

        let mut args = leading.to_vec();
        args.extend(operation.compose_args().iter().map(|a| a.to_string()));

        info!(unit = %unit, operation = %operation, "Spawning compose");
        let report = process::run_streaming(program, &args, &dir, &env, sink.as_ref()).await;

        let mut outcome = match report {
            Ok(report) if report.success => {
                let mut outcome = OperationOutcome::succeeded(operation, unit);
                if operation == Operation::Stop && !report.error_lines.is_empty() {
                    outcome.error = Some(report.error_lines.join("\n"));
                }
                outcome
            }
            Ok(report) if operation == Operation::Stop && !report.error_lines.is_empty() => {
                OperationOutcome::failed(operation, unit, report.error_lines.join("\n"))
            }
            Ok(report) => OperationOutcome::failed(operation, unit, report.failure_message()),
            Err(e) => OperationOutcome::failed(
                operation,
                unit,
                format!("failed to spawn {}: {}", program, e),
            ),
        };

        if operation == Operation::Start && outcome.success {
            match self.catalog.get_unit(principal, unit).await {
                Ok(snapshot) => outcome.ports = Some(snapshot.ports),
                Err(e) => warn!(unit = %unit, error = %e, "Could not resolve ports after start"),
            }
        }

        Ok(self.finish(outcome, started))
    }

    fn finish(&self, mut outcome: OperationOutcome, started: Instant) -> OperationOutcome {
        outcome.finished_at = Utc::now();
        self.metrics.record_operation(
            outcome.operation.as_str(),
            outcome.success,
            started.elapsed().as_secs_f64(),
        );
        self.logger.log_operation(&outcome);
        outcome
    }
}
