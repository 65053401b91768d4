//! Unix-socket daemon that owns the controller, and its client.

pub mod client;
pub mod paths;
pub mod server;

pub use client::DaemonClient;
pub use server::DaemonServer;
