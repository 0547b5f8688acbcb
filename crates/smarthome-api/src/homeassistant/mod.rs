// Home Assistant: REST states/areas/services and the state_changed WebSocket.

pub mod client;
pub mod models;

pub use client::{
    AREAS_TEMPLATE, DEFAULT_PORT, HaSocketHandshake, HaSocketPhase, HaSocketStep,
    HomeAssistantClient,
};
pub use models::{HaArea, HaState, SUPPORTED_DOMAINS};
