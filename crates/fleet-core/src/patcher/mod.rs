//! Compatibility patching of build manifests
//!
//! Scans every Dockerfile under a unit directory, plus the unit's compose
//! definition, against the static rule catalog in [`rules`]. `analyze`
//! only reports; `fix` applies every matching rule in one pass per file and
//! writes back files whose content changed.

pub mod rules;

use crate::auth::AuthenticatedPrincipal;
use crate::catalog::COMPOSE_FILES;
use crate::error::Result;
use crate::observability::{FleetMetrics, StructuredLogger};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &["node_modules", "vendor", "__pycache__", "target", "venv"];

/// Rule family a fix belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    BrokenImage,
    EolRepository,
    PinnedTool,
    ComposeExpose,
}

/// One detected or applied change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixItem {
    pub kind: FixKind,
    /// Path relative to the unit directory, `/`-separated
    pub file: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

fn is_build_manifest(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower == "dockerfile" || lower.starts_with("dockerfile.") || lower.ends_with(".dockerfile")
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// All rule families applied to one Dockerfile
fn plan_dockerfile(content: &str, file: &str) -> (String, Vec<FixItem>) {
    let (current, mut items) = rules::fix_tags(content, file, rules::BROKEN_TAGS, FixKind::BrokenImage);
    let (mut current, pinned) = rules::fix_tags(&current, file, rules::PINNED_TOOLS, FixKind::PinnedTool);
    items.extend(pinned);

    if let Some((rewritten, item)) = rules::fix_eol_repository(&current, file) {
        current = rewritten;
        items.push(item);
    }

    (current, items)
}

/// Detects and rewrites known-broken build definitions
pub struct CompatibilityPatcher {
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl Default for CompatibilityPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CompatibilityPatcher {
    pub fn new() -> Self {
        Self {
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("patcher"),
        }
    }

    /// Report every applicable fix without writing anything
    pub async fn analyze(
        &self,
        _principal: &AuthenticatedPrincipal,
        unit_path: &Path,
    ) -> Result<Vec<FixItem>> {
        let mut items = Vec::new();
        for (_, _, planned) in self.plan(unit_path).await? {
            items.extend(planned);
        }

        self.logger
            .log_fixes(&unit_label(unit_path), items.len(), false);
        Ok(items)
    }

    /// Apply every applicable fix, writing back only files that changed
    pub async fn fix(
        &self,
        _principal: &AuthenticatedPrincipal,
        unit_path: &Path,
    ) -> Result<Vec<FixItem>> {
        let mut items = Vec::new();
        for (path, rewritten, planned) in self.plan(unit_path).await? {
            fs::write(&path, rewritten).await?;
            debug!(file = %path.display(), fixes = planned.len(), "Manifest rewritten");
            items.extend(planned);
        }

        self.metrics.add_fixes_applied(items.len() as u64);
        self.logger
            .log_fixes(&unit_label(unit_path), items.len(), true);
        Ok(items)
    }

    /// Files needing changes, with their rewritten content and fixes
    async fn plan(&self, unit_path: &Path) -> Result<Vec<(PathBuf, String, Vec<FixItem>)>> {
        let mut planned = Vec::new();

        for path in find_build_manifests(unit_path).await? {
            let Some(content) = read_text(&path).await else {
                continue;
            };
            let file = relative_path(unit_path, &path);
            let (rewritten, items) = plan_dockerfile(&content, &file);
            if !items.is_empty() && rewritten != content {
                planned.push((path, rewritten, items));
            }
        }

        for name in COMPOSE_FILES {
            let path = unit_path.join(name);
            let Some(content) = read_text(&path).await else {
                continue;
            };
            let (rewritten, items) = rules::fix_compose_expose(&content, name);
            if !items.is_empty() && rewritten != content {
                planned.push((path, rewritten, items));
            }
        }

        Ok(planned)
    }
}

fn unit_label(unit_path: &Path) -> String {
    unit_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Unreadable or non-UTF-8 files are skipped
async fn read_text(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Skipping unreadable manifest");
            None
        }
    }
}

/// Recursively collect Dockerfiles under `root`, in sorted order
async fn find_build_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e.into()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if !is_skipped_dir(&name) {
                    pending.push(entry.path());
                }
            } else if is_build_manifest(&name) {
                found.push(entry.path());
            }
        }
    }

    found.sort();
    Ok(found)
}
