// smarthome-api: Async transport clients for local smart-home bridges.
//
// One client per vendor (Hue bridge, Hue sync box, Dirigera, Nanoleaf,
// Home Assistant, Shelly), each owning one HTTP session and at most one
// streaming subscription, reporting into a `ConnectionTracker`.

pub mod auth;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod pairing;
pub mod rest;
pub mod sse;
pub mod subscription;
pub mod transport;
pub mod websocket;

pub mod dirigera;
pub mod homeassistant;
pub mod hue;
pub mod huesync;
pub mod nanoleaf;
pub mod shelly;

pub use auth::TokenSlot;
pub use connection::{ClientEvent, ConnectionTracker, LinkState, RequestKind};
pub use discovery::{DiscoveredService, parse_avahi_browse};
pub use error::{Error, ErrorKind};
pub use pairing::{PairingPolicy, PairingStep, run_pairing};
pub use rest::{RestClient, TokenPlacement};
pub use subscription::StreamSubscription;
pub use transport::{HttpSession, TlsMode, TransportConfig};

pub use dirigera::DirigeraClient;
pub use homeassistant::HomeAssistantClient;
pub use hue::HueBridgeClient;
pub use huesync::HueSyncClient;
pub use nanoleaf::NanoleafClient;
pub use shelly::ShellyClient;
