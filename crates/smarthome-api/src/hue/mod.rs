// Philips Hue bridge: CLIP v2 REST, link-button pairing, SSE event stream.

pub mod client;
pub mod models;

pub use client::{HueBridgeClient, HueEventItem, decode_event_data};
pub use models::{HueCredentials, HueEntertainmentConfiguration, HueResources};
