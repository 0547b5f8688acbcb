//! Device, scene and group listings.

use smarthome_core::{CanonicalTree, Device, Group};
use tabled::Tabled;

use crate::cli::{GlobalOpts, ListArgs, OutputFormat};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Color")]
    color: String,
    #[tabled(rename = "Groups")]
    groups: String,
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Devices")]
    count: usize,
    #[tabled(rename = "Members")]
    members: String,
}

fn device_row(d: &Device, tree: &CanonicalTree, color: bool) -> DeviceRow {
    let percent = |v: f64| format!("{:.0}%", v * 100.0);
    DeviceRow {
        id: d.id.clone(),
        name: d.name.clone(),
        kind: d.kind.to_string(),
        power: output::power(d.switch, color),
        level: d
            .brightness
            .or(d.position)
            .map(percent)
            .unwrap_or_default(),
        color: d
            .color
            .or(d.color_temperature)
            .map(|c| c.to_hex())
            .unwrap_or_default(),
        groups: d
            .groups
            .iter()
            .chain(&d.associated)
            .map(|id| tree.groups.get(id).map_or(id.as_str(), |g| g.name.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn group_row(g: &Group, tree: &CanonicalTree) -> GroupRow {
    GroupRow {
        id: g.id.clone(),
        name: g.name.clone(),
        count: g.devices.len(),
        members: g
            .devices
            .iter()
            .map(|id| tree.device(id).map_or(id.as_str(), |d| d.name.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn devices(session: &Session, args: &ListArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let tree = session.bridge.tree();
    let color = output::should_color(&global.color);
    let entries: Vec<&Device> = tree
        .devices
        .values()
        .filter(|d| args.scenes || !d.is_scene())
        .collect();

    let rendered = output::render_list(
        &global.output,
        &entries,
        |d| device_row(d, &tree, color),
        |d| d.id.clone(),
    )?;
    output::print_output(&rendered, global.quiet);

    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        eprintln!(
            "{}: {}",
            session.bridge.id(),
            output::connectivity(session.bridge.connectivity(), color)
        );
    }
    Ok(())
}

pub fn groups(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let tree = session.bridge.tree();
    let entries: Vec<&Group> = tree.groups.values().collect();
    let rendered = output::render_list(
        &global.output,
        &entries,
        |g| group_row(g, &tree),
        |g| g.id.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use smarthome_core::Rgb;

    use super::*;

    #[test]
    fn rows_show_names_not_ids() {
        let mut tree = CanonicalTree::new();
        let mut lamp = Device::new("L1", "Desk Lamp");
        lamp.set_switch(true);
        lamp.set_brightness(0.4);
        lamp.set_color(Rgb::new(255, 0, 0));
        lamp.add_group("G1");
        tree.insert_device(lamp);
        tree.insert_group(Group::new("G1", "Office"));
        tree.rebuild_groups();

        let row = device_row(tree.device("L1").unwrap(), &tree, false);
        assert_eq!(row.power, "on");
        assert_eq!(row.level, "40%");
        assert_eq!(row.color, "#ff0000");
        assert_eq!(row.groups, "Office");

        let row = group_row(&tree.groups["G1"], &tree);
        assert_eq!(row.count, 1);
        assert_eq!(row.members, "Desk Lamp");
    }
}
