// src/lib.rs

//! A failover-aware client for Sentinel-managed Redis-compatible stores:
//! sentinel discovery, master resolution, pool lifecycle, and subscription
//! replay across reconnections.

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod protocol;
pub mod state;
pub mod topology;

// Re-export
pub use client::SentinelPool;
pub use config::ClientConfig;
pub use errors::SentinelPoolError;
pub use state::ClientState;
