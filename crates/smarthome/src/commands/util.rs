//! Shared helpers for command handlers.

use smarthome_core::{CanonicalTree, Target};

use crate::error::CliError;

/// Resolve a device or group by id, then by case-insensitive name.
/// Groups win over devices on a name clash.
pub fn resolve_target(tree: &CanonicalTree, identifier: &str) -> Result<Target, CliError> {
    if let Ok(target) = Target::resolve(tree, identifier) {
        return Ok(target);
    }
    let by_name = tree
        .groups
        .values()
        .find(|g| g.name.eq_ignore_ascii_case(identifier))
        .map(|g| g.id.as_str())
        .or_else(|| {
            tree.devices
                .values()
                .find(|d| !d.is_scene() && d.name.eq_ignore_ascii_case(identifier))
                .map(|d| d.id.as_str())
        });
    match by_name {
        Some(id) => Ok(Target::resolve(tree, id)?),
        None => Err(CliError::NotFound {
            resource_type: "device or group".into(),
            identifier: identifier.into(),
            list_command: "list".into(),
        }),
    }
}

/// Resolve a scene by id or case-insensitive name.
pub fn resolve_scene(tree: &CanonicalTree, identifier: &str) -> Result<String, CliError> {
    tree.scenes()
        .find(|s| s.id == identifier)
        .or_else(|| tree.scenes().find(|s| s.name.eq_ignore_ascii_case(identifier)))
        .map(|s| s.id.clone())
        .ok_or_else(|| CliError::NotFound {
            resource_type: "scene".into(),
            identifier: identifier.into(),
            list_command: "list --scenes".into(),
        })
}

/// Percent (0-100) to the unit interval.
pub fn fraction(percent: u8) -> f64 {
    f64::from(percent.min(100)) / 100.0
}
