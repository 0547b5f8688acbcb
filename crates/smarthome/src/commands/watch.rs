//! Follow tree updates and connectivity until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use smarthome_core::{BridgeEvent, CanonicalTree, Device, ReconnectPolicy, supervise};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

pub async fn handle(session: &Session, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let bridge = Arc::clone(&session.bridge);

    let cancel = CancellationToken::new();
    let supervisor = tokio::spawn(supervise(
        Arc::clone(&bridge),
        ReconnectPolicy::default(),
        cancel.clone(),
    ));

    let mut trees = bridge.watch();
    let mut events = bridge.events();
    let mut previous = trees.latest();

    let mut poll = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    print_line(
        &format!(
            "watching {} ({})",
            bridge.id(),
            output::connectivity(bridge.connectivity(), color)
        ),
        color,
        global.quiet,
    );

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            tree = trees.changed() => {
                let Some(tree) = tree else { break };
                for change in changes(&previous, &tree) {
                    print_line(&change, color, global.quiet);
                }
                previous = tree;
            }
            event = events.recv() => match event {
                Ok(BridgeEvent::ConnectionProblem { connectivity }) => print_line(
                    &format!("connection: {}", output::connectivity(connectivity, color)),
                    color,
                    global.quiet,
                ),
                Ok(BridgeEvent::DataReady { .. }) => {}
                Ok(other) => print_line(&format!("{other:?}"), color, global.quiet),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                if let Err(e) = bridge.request_data().await {
                    warn!(error = %e, "refresh failed");
                }
            }
        }
    }

    cancel.cancel();
    let _ = supervisor.await;
    Ok(())
}

fn print_line(message: &str, color: bool, quiet: bool) {
    let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
    let stamp = if color { stamp.dimmed().to_string() } else { stamp };
    output::print_output(&format!("{stamp} {message}"), quiet);
}

/// One line per device that appeared, vanished or changed state.
fn changes(before: &CanonicalTree, after: &CanonicalTree) -> Vec<String> {
    let mut out = Vec::new();
    for device in after.devices.values().filter(|d| !d.is_scene()) {
        match before.device(&device.id) {
            None => out.push(format!("+ {} {}", device.name, state(device))),
            Some(old) if state(old) != state(device) => {
                out.push(format!("{}: {}", device.name, state(device)));
            }
            Some(_) => {}
        }
    }
    for device in before.devices.values().filter(|d| !d.is_scene()) {
        if after.device(&device.id).is_none() {
            out.push(format!("- {}", device.name));
        }
    }
    out
}

fn state(device: &Device) -> String {
    let mut parts = Vec::new();
    if let Some(on) = device.switch {
        parts.push(if on { "on".to_owned() } else { "off".to_owned() });
    }
    if let Some(level) = device.brightness.or(device.position) {
        parts.push(format!("{:.0}%", level * 100.0));
    }
    if let Some(c) = device.color.or(device.color_temperature) {
        parts.push(c.to_hex());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp(on: bool) -> Device {
        let mut lamp = Device::new("L1", "Desk Lamp");
        lamp.set_switch(on);
        lamp.set_brightness(0.5);
        lamp
    }

    #[test]
    fn reports_state_changes() {
        let mut before = CanonicalTree::new();
        before.insert_device(lamp(true));
        before.insert_device(Device::new("S1", "Socket"));
        let mut after = CanonicalTree::new();
        after.insert_device(lamp(false));
        after.insert_device(Device::new("P1", "Plug"));

        assert_eq!(
            changes(&before, &after),
            vec!["Desk Lamp: off 50%", "+ Plug ", "- Socket"]
        );
        assert!(changes(&after, &after).is_empty());
    }
}
