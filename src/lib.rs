//! PiVPN Reporter - PiVPN client presence for Home Assistant
//!
//! This crate watches the clients of a PiVPN server (WireGuard or OpenVPN)
//! and mirrors them into Home Assistant over MQTT. New clients are announced
//! through MQTT discovery, removed clients are retracted, and every client's
//! addresses, traffic counters and last-seen time are republished on a
//! fixed interval.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML) and CLI overrides
//! - `backend`: WireGuard/OpenVPN table layouts and parsing
//! - `source`: Running the `pivpn` command
//! - `registry`: Last-known client list and membership diffing
//! - `mqtt`: Topics, discovery and status messages, broker client
//! - `reconcile`: One snapshot/diff/publish cycle
//! - `session`: Broker connection lifecycle and scheduling
//!
//! # Usage
//!
//! ```bash
//! pivpn-reporter --mqtt-host broker.lan --vpn-type WireGuard --update-interval 60
//! ```

pub mod backend;
pub mod config;
pub mod mqtt;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod source;

pub use backend::Backend;
pub use config::Config;
pub use session::{run, SessionError};
