// Shelly relays, dimmers, RGB lights and rollers (gen1 REST, gen2+ RPC).

pub mod client;
pub mod digest;
pub mod models;

pub use client::{CoverCommand, ShellyClient};
pub use models::{ShellyGeneration, ShellyInfo};
