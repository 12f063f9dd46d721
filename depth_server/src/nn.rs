//! Depth estimation network.
//!
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::{
    status::{ModelState, ModelStatus},
    utils::download_file,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Depth Anything (small), exported to ONNX.
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/Xenova/depth-anything-small-hf/resolve/main/onnx/model.onnx";

/// Input edge length of the model, a multiple of the ViT patch size 14.
pub const DEFAULT_INPUT_SIZE: u32 = 518;

// ImageNet normalization used by the DPT image processor
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Raw depth output of an estimator, before it is checked against its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthTensor {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

/// Anything that turns an image into relative depth.
pub trait DepthEstimator {
    fn estimate(&self, input: &RgbImage) -> Result<DepthTensor>;
}

/// Where to get the model from and which input size it is run with.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Local ONNX file. If unset, the model is downloaded from `url` once and cached.
    pub path: Option<PathBuf>,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: DEFAULT_MODEL_URL.to_owned(),
            width: DEFAULT_INPUT_SIZE,
            height: DEFAULT_INPUT_SIZE,
        }
    }
}

pub struct DepthModel {
    model: NnModel,
    width: u32,
    height: u32,
}

impl DepthModel {
    /// Fetch (if needed) and load the model, reporting progress into `status`.
    pub async fn new(config: &ModelConfig, status: &ModelStatus) -> Result<Self> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => fetch_model(&config.url, status).await?,
        };

        status.set(ModelState::Loading);
        log::info!("Loading depth model from {}", path.display());

        let (width, height) = (config.width, config.height);
        let model = tokio::task::spawn_blocking(move || load_model(&path, width, height)).await??;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::CatmullRom,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 / 255.0 - MEAN[c]) / STD[c],
        )
        .into()
    }
}

impl DepthEstimator for DepthModel {
    fn estimate(&self, input: &RgbImage) -> Result<DepthTensor> {
        let raw_nn_out = self.model.run(tvec!(self.preproc(input).into()))?;

        // First output is `predicted_depth` with shape [1, h, w]
        let predicted_depth = raw_nn_out
            .first()
            .context("depth model returned no output")?
            .to_array_view::<f32>()?;

        Ok(DepthTensor {
            dims: predicted_depth.shape().to_vec(),
            data: predicted_depth.iter().copied().collect(),
        })
    }
}

fn load_model(path: &Path, width: u32, height: u32) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, height as usize, width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Return the cached model file for `url`, downloading it first if necessary.
async fn fetch_model(url: &str, status: &ModelStatus) -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("no cache directory available")?
        .join("depthcam");
    tokio::fs::create_dir_all(&dir).await?;

    let filepath = dir.join(model_file_name(url));
    if filepath.exists() {
        log::info!("Using cached model {}", filepath.display());
        return Ok(filepath);
    }

    log::info!("Downloading depth model from {url}");
    status.set(ModelState::Downloading { progress: 0.0 });

    let mut last_logged = 0;
    download_file(&Client::new(), url, &filepath, |progress| {
        status.set(ModelState::Downloading { progress });
        let decile = (progress / 10.0) as u32;
        if decile > last_logged {
            last_logged = decile;
            log::info!("Loading model... {progress:.1}%");
        }
    })
    .await
    .with_context(|| format!("failed to download model from {url}"))?;

    Ok(filepath)
}

/// Stable file name for a model URL, so different models do not overwrite each other.
fn model_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{}.onnx", &hex::encode(digest)[..16])
}
