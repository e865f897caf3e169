//! Bridge between a Honeywell Galaxy alarm's SelfMon VMOD MQTT gateway and
//! typed sensor entities.
//!
//! Setup runs two time-boxed discovery passes over the broker (modules, then
//! the sensors of the chosen module), classifies every topic seen, and lets a
//! wizard collect the user's choices into an [`flow::EntryData`]. At runtime
//! the [`registry::ModuleRegistry`] starts one subscribed entity per enabled
//! sensor, each decoding its own payloads.

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod entity;
pub mod flow;
pub mod mqtt;
pub mod registry;
pub mod store;
pub mod topics;
