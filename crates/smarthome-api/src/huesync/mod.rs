// Philips Hue HDMI sync box: polled REST with button registration.

pub mod client;
pub mod models;

pub use client::{HueSyncClient, MAX_BRIGHTNESS};
pub use models::{HdmiInput, SyncBoxState, SyncIntensity, SyncMode};
