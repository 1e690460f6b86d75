//! Core library for the benchmark fleet service
//!
//! This crate provides the core functionality for:
//! - Container daemon access
//! - Host and cgroup-aware resource sampling
//! - Benchmark unit discovery and fleet snapshots
//! - Supervised lifecycle operations (build, start, stop, restart, image removal)
//! - Compatibility patching of build manifests
//! - Catalog synchronisation, health checks and observability

pub mod auth;
pub mod catalog;
pub mod daemon;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod patcher;
pub mod probe;
pub mod sync;

pub use auth::AuthenticatedPrincipal;
pub use catalog::{CatalogConfig, FleetCatalog};
pub use daemon::{DaemonGateway, DockerGateway};
pub use error::{DaemonError, FleetError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{LifecycleConfig, LifecycleController, Operation, OperationOutcome, UnitLocks};
pub use models::*;
pub use observability::{FleetMetrics, StructuredLogger};
pub use patcher::{CompatibilityPatcher, FixItem, FixKind};
pub use probe::{ProbePaths, ResourceProbe};
pub use sync::{CatalogSync, SyncAction, SyncConfig, SyncOutcome};
