//! Depth estimation server.
//!
//! Images arrive as HTTP uploads or over the data socket, run through a [`nn::DepthEstimator`]
//! and are returned as grayscale depth maps produced by [`raster::rasterize`].
pub mod data_socket;
pub mod endpoints;
pub mod inferer;
pub mod meter;
pub mod nn;
pub mod raster;
pub mod service;
pub mod status;
pub mod utils;
