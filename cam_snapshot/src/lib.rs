//! Camera client taking snapshots and requesting their depth maps from `depth_server`.
pub mod client;
pub mod sensors;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
