//! Common code shared between `depth_server` and `cam_snapshot`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
