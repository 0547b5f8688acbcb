// Nanoleaf panels: token-in-path REST with bounded retry, SSE push.

pub mod client;
pub mod models;

pub use client::{DEFAULT_PORT, NanoleafClient};
pub use models::{NanoleafAttrEvent, NanoleafEvent, NanoleafInfo, NanoleafState};
