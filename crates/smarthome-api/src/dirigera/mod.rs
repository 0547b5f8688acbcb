// IKEA Dirigera: PKCE pairing, REST, WebSocket push.

pub mod client;
pub mod models;

pub use client::{DEFAULT_PORT, DirigeraClient, Pkce};
pub use models::{DirigeraDevice, DirigeraHome, DirigeraScene};
