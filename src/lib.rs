//! Installer and operations tooling for a self-hosted proxy panel and its nodes.
//!
//! The binary in `main.rs` is a thin layer over the managers in [`core`].

pub mod core;
pub mod utils;
