//! # cogs-cli: command-line pub/sub client
//!
//! Loads a TOML configuration, connects one `cogs_core::PubSubClient`
//! and prints what the service sends.

pub mod config;
