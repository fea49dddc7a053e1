pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod server;
pub mod tunnel;
