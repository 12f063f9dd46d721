//! Inference worker turning encoded images into depth maps.
//!
use std::thread::JoinHandle;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use image::imageops::FilterType;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    meter::METER,
    nn::DepthEstimator,
    raster::{encode_png, rasterize, DepthBuffer, RasterError},
    utils::decode_image,
};

/// Number of images that may wait for the worker.
const INFER_QUEUE_DEPTH: usize = 8;

/// Why a single image could not be turned into a depth map.
#[derive(Debug, Error)]
pub enum InferError {
    #[error("depth model is not ready yet, wait a moment")]
    NotReady,
    #[error("could not decode image: {0:#}")]
    Decode(anyhow::Error),
    #[error("depth estimation failed: {0:#}")]
    Estimate(anyhow::Error),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("could not encode depth map: {0}")]
    Encode(#[from] image::ImageError),
    #[error("inference worker stopped")]
    WorkerGone,
}

impl InferError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InferError::NotReady | InferError::WorkerGone => StatusCode::SERVICE_UNAVAILABLE,
            InferError::Decode(_) => StatusCode::BAD_REQUEST,
            InferError::Raster(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferError::Estimate(_) | InferError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for InferError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// How the depth map should be rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Scale the depth map to the size of the input image instead of the model output size.
    pub fit_input: bool,
}

/// PNG encoded grayscale depth map.
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

struct InferJob {
    data: Vec<u8>,
    options: RenderOptions,
    reply: oneshot::Sender<Result<DepthMap, InferError>>,
}

/// Cloneable handle to submit images to the worker.
#[derive(Clone)]
pub struct InferHandle {
    tx: mpsc::Sender<InferJob>,
}

impl InferHandle {
    /// Queue an encoded image and wait for its depth map.
    pub async fn process(
        &self,
        data: Vec<u8>,
        options: RenderOptions,
    ) -> Result<DepthMap, InferError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(InferJob {
                data,
                options,
                reply,
            })
            .await
            .map_err(|_| InferError::WorkerGone)?;

        reply_rx.await.map_err(|_| InferError::WorkerGone)?
    }
}

/// Owns the estimator and processes one image at a time on a dedicated thread.
pub struct Inferer {
    infer_rx: mpsc::Receiver<InferJob>,
    model: Box<dyn DepthEstimator + Send>,
}

impl Inferer {
    /// Start the worker thread. It stops once every [`InferHandle`] is dropped.
    pub fn spawn(
        model: Box<dyn DepthEstimator + Send>,
    ) -> std::io::Result<(InferHandle, JoinHandle<()>)> {
        let (tx, infer_rx) = mpsc::channel(INFER_QUEUE_DEPTH);
        let inferer = Self { infer_rx, model };

        let join_handle = std::thread::Builder::new()
            .name("inferer".into())
            .spawn(move || inferer.run())?;

        Ok((InferHandle { tx }, join_handle))
    }

    fn run(mut self) {
        while let Some(job) = self.infer_rx.blocking_recv() {
            let result = self.process(&job.data, job.options);
            match &result {
                Ok(depth_map) => {
                    METER.tick_processed();
                    log::info!("Depth map {}x{} ready", depth_map.width, depth_map.height);
                }
                Err(e) => {
                    METER.tick_failed();
                    log::warn!("Failed to process image: {e}");
                }
            }
            // The requester may have given up already
            job.reply.send(result).ok();
        }
        log::info!("Inference worker stopped");
    }

    fn process(&self, data: &[u8], options: RenderOptions) -> Result<DepthMap, InferError> {
        let image = decode_image(data).map_err(InferError::Decode)?;
        log::debug!(
            "Analyzing depth of {}x{} image",
            image.width(),
            image.height()
        );

        let tensor = self.model.estimate(&image).map_err(InferError::Estimate)?;
        let depth = DepthBuffer::from_shape(&tensor.dims, tensor.data)?;

        let mut raster = rasterize(&depth);
        if options.fit_input && raster.dimensions() != image.dimensions() {
            raster = image::imageops::resize(
                &raster,
                image.width(),
                image.height(),
                FilterType::Triangle,
            );
        }

        Ok(DepthMap {
            width: raster.width(),
            height: raster.height(),
            png: encode_png(&raster)?,
        })
    }
}
