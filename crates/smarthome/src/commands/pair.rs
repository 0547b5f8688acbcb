//! Link-button pairing and token storage.

use secrecy::ExposeSecret;
use smarthome_config::{keyring_account, save_config_to, store_secret};
use smarthome_core::plugins;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{GlobalOpts, PairArgs};
use crate::error::CliError;
use crate::output;
use crate::session;

pub async fn handle(args: &PairArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut config, path) = session::load(global)?;
    let plugin = session::named(&config, &args.bridge)?;
    let options = smarthome_config::bridge_options(&config);
    let Some(entry) = config.bridges.get_mut(&args.bridge) else {
        return Err(CliError::UnknownBridge {
            name: args.bridge.clone(),
            available: String::new(),
        });
    };
    let unit = args.device.clone().or_else(|| match entry.devices.as_slice() {
        [only] => Some(only.key.clone()),
        _ => None,
    });

    let bridge = plugins::build(plugin, options);
    bridge.prepare().await?;
    if !global.quiet {
        eprintln!("Press the link button on {} now (Ctrl-C to abort)...", args.bridge);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = bridge.pair(unit.as_deref(), &cancel).await;
    ctrl_c.abort();
    bridge.clear_instance().await;

    let token = result.map_err(|e| match CliError::from(e) {
        CliError::PairingFailed { attempts, .. } => CliError::PairingFailed {
            bridge: args.bridge.clone(),
            attempts,
        },
        other => other,
    })?;

    if args.plaintext {
        let slot = match unit.as_deref().filter(|_| !entry.devices.is_empty()) {
            Some(key) => {
                &mut entry
                    .devices
                    .iter_mut()
                    .find(|d| d.key == key)
                    .ok_or_else(|| CliError::NotFound {
                        resource_type: "device".into(),
                        identifier: key.to_owned(),
                        list_command: "list".into(),
                    })?
                    .token
            }
            None => &mut entry.token,
        };
        *slot = Some(token.expose_secret().to_owned());
        save_config_to(&config, &path)?;
        info!(path = %path.display(), "token written to config");
    } else {
        let account = match unit.as_deref() {
            Some(key) => entry.device_account(&args.bridge, key, "token"),
            None => keyring_account(&args.bridge, None, "token"),
        };
        store_secret(&account, token.expose_secret())?;
        info!(%account, "token stored in keyring");
    }

    output::print_output(&format!("Paired with {}", args.bridge), global.quiet);
    Ok(())
}
