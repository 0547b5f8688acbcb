// ── Vendor plugins ──
//
// One `DeviceBridge` implementation per vendor. Each owns its transport
// clients, a reconciler and the published tree; `build` picks the right
// one for a configured instance.

mod common;

pub mod dirigera;
pub mod homeassistant;
pub mod hue;
pub mod huesync;
pub mod nanoleaf;
pub mod shelly;

use std::sync::Arc;

pub use dirigera::DirigeraPlugin;
pub use homeassistant::HomeAssistantPlugin;
pub use hue::HueBridgePlugin;
pub use huesync::HueSyncPlugin;
pub use nanoleaf::NanoleafPlugin;
pub use shelly::ShellyPlugin;

use crate::bridge::DeviceBridge;
use crate::config::{BridgeConfig, BridgeOptions, PluginConfig};

/// Instantiate the plugin for `config`. No I/O happens until
/// [`DeviceBridge::prepare`].
pub fn build(config: PluginConfig, options: BridgeOptions) -> Arc<dyn DeviceBridge> {
    let id = config.id.as_str();
    match config.bridge {
        BridgeConfig::HueBridge(c) => Arc::new(HueBridgePlugin::new(id, c, options)),
        BridgeConfig::HueSync(c) => Arc::new(HueSyncPlugin::new(id, c, options)),
        BridgeConfig::Dirigera(c) => Arc::new(DirigeraPlugin::new(id, c, options)),
        BridgeConfig::Nanoleaf(c) => Arc::new(NanoleafPlugin::new(id, c, options)),
        BridgeConfig::HomeAssistant(c) => Arc::new(HomeAssistantPlugin::new(id, c, options)),
        BridgeConfig::Shelly(c) => Arc::new(ShellyPlugin::new(id, c, options)),
    }
}
