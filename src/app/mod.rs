//! Application core — the OTA state machine and its boundary.
//!
//! [`session`] holds the update lifecycle (check → download → flash →
//! verify → reboot).  Every interaction with the network, flash, settings
//! store, bus and system clock goes through the **port traits** in
//! [`ports`], so the whole pipeline runs on the host against simulated
//! adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod session;
