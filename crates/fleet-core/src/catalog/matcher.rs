//! Container to unit association
//!
//! A container belongs to a unit when its compose project label names the
//! unit, or failing that, when one of its names contains the unit name.
//! Both comparisons are case-insensitive; compose lowercases project names.

use crate::models::RawContainer;
use std::collections::HashMap;

/// Label compose puts on every container it creates
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Owning unit of a container, or None if no unit claims it
///
/// Label match is checked first. For the name fallback the longest matching
/// unit name wins, so "xben-010" never captures containers of "xben-0101".
pub fn owning_unit<'a>(container: &RawContainer, units: &'a [String]) -> Option<&'a str> {
    if let Some(project) = container.labels.get(COMPOSE_PROJECT_LABEL) {
        if let Some(unit) = units.iter().find(|u| u.eq_ignore_ascii_case(project)) {
            return Some(unit.as_str());
        }
    }

    let names: Vec<String> = container
        .names
        .iter()
        .map(|n| n.trim_start_matches('/').to_lowercase())
        .collect();

    units
        .iter()
        .filter(|unit| {
            let needle = unit.to_lowercase();
            names.iter().any(|n| n.contains(&needle))
        })
        .max_by_key(|unit| unit.len())
        .map(|unit| unit.as_str())
}

/// Group containers by owning unit, preserving the daemon's list order
/// within each group. Unclaimed containers are dropped.
pub fn assign_containers(
    containers: &[RawContainer],
    units: &[String],
) -> HashMap<String, Vec<RawContainer>> {
    let mut assigned: HashMap<String, Vec<RawContainer>> = HashMap::new();

    for container in containers {
        if let Some(unit) = owning_unit(container, units) {
            assigned
                .entry(unit.to_string())
                .or_default()
                .push(container.clone());
        }
    }

    assigned
}
