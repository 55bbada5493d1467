//! # courier-server
//!
//! The Courier routing server: accept loop, per-connection endpoint
//! wiring, and the shared room directory.
//!
//! Applications embed [`Server`] directly or run the standalone `courier`
//! binary, which routes frames between clients without any application
//! logic of its own.

pub mod config;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use server::Server;
