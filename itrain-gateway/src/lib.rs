//! # itrain-gateway: iTrain camera gateway daemon
//!
//! Serves the binary train-control protocol to the train controllers on
//! one side and talks to the camera's JSON configuration bus on the other.
//!
//! ## Pieces
//!
//! - **config**: TOML configuration with defaults and clamping.
//! - **bus**: JSON-lines bus client implementing the core collaborator traits.
//! - **service**: wires bus, event router and reactor together.

pub mod bus;
pub mod config;
pub mod service;
