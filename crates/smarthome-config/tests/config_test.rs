// Loading and saving `config.toml` from a temporary directory.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use smarthome_config::{
    Config, ConfigError, bridge_options, load_config_from, login_state, plugin_config, plugin_configs,
    save_config_to,
};
use smarthome_core::{BridgeConfig, BridgeKind};

const SAMPLE: &str = r#"
timeout = 8
hide_unavailable = true
off_shutdown = true
on_login = '{"_all_": {"switch": true, "brightness": 0.6}}'

[bridges.hue]
kind = "hue-bridge"
ip = "192.168.1.2"
token = "hue-app-key"

[bridges.leaf]
kind = "nanoleaf"

[[bridges.leaf.devices]]
key = "shapes"
ip = "192.168.1.30"
port = 16021
token = "nl-token"

[[bridges.leaf.devices]]
key = "lines"
ip = "192.168.1.31"
token = "nl-token-2"
"#;

fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

#[test]
fn test_loads_globals_and_bridges() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&write_sample(&dir)).unwrap();

    assert_eq!(config.timeout, 8);
    assert!(config.hide_unavailable);
    assert!(config.off_shutdown);
    assert_eq!(config.bridges.len(), 2);

    let options = bridge_options(&config);
    assert_eq!(options.timeout, std::time::Duration::from_secs(8));
    assert!(options.hide_unavailable);

    let login = login_state(&config).unwrap();
    assert!(!login.is_empty());
}

#[test]
fn test_translates_multi_device_bridges() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&write_sample(&dir)).unwrap();

    let plugins = plugin_configs(&config).unwrap();
    let kinds: Vec<BridgeKind> = plugins.iter().map(|p| p.bridge.kind()).collect();
    assert_eq!(kinds, vec![BridgeKind::HueBridge, BridgeKind::Nanoleaf]);

    let BridgeConfig::Nanoleaf(leaf) = plugin_config(&config, "leaf").unwrap().bridge else {
        panic!("wrong kind");
    };
    let keys: Vec<&str> = leaf.devices.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["shapes", "lines"]);
    assert_eq!(leaf.devices[0].port, Some(16021));
    assert_eq!(leaf.devices[1].token.as_ref().unwrap().expose_secret(), "nl-token-2");
}

#[test]
fn test_unknown_bridge_name() {
    let config = Config::default();
    assert!(matches!(
        plugin_config(&config, "nope"),
        Err(ConfigError::UnknownBridge { .. })
    ));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = load_config_from(&write_sample(&dir)).unwrap();
    config.bridges.get_mut("hue").unwrap().token = Some("rotated".into());

    let saved = dir.path().join("nested").join("config.toml");
    save_config_to(&config, &saved).unwrap();
    let reloaded = load_config_from(&saved).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_bad_login_blob_is_validation_error() {
    let config = Config {
        on_login: Some("{not json".into()),
        ..Config::default()
    };
    assert!(matches!(login_state(&config), Err(ConfigError::Validation { .. })));
}
