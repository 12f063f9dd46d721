//! Shared state of the server: model status and the inference worker.
//!
use std::sync::Arc;

use tokio::{sync::OnceCell, task::JoinHandle};

use crate::{
    inferer::{DepthMap, InferError, InferHandle, Inferer, RenderOptions},
    nn::{DepthModel, ModelConfig},
    status::{ModelState, ModelStatus},
};

/// Entry point for all front ends that want depth maps.
#[derive(Default)]
pub struct DepthService {
    status: ModelStatus,
    inferer: OnceCell<InferHandle>,
}

impl DepthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    /// Make the worker available to requests. Only the first call has an effect.
    pub fn install(&self, handle: InferHandle) {
        if self.inferer.set(handle).is_ok() {
            self.status.set(ModelState::Ready);
            log::info!("Depth model ready");
        } else {
            log::warn!("Inference worker already installed");
        }
    }

    pub async fn process(
        &self,
        data: Vec<u8>,
        options: RenderOptions,
    ) -> Result<DepthMap, InferError> {
        let handle = self.inferer.get().ok_or(InferError::NotReady)?;
        handle.process(data, options).await
    }
}

/// Load the model in the background and install a worker for it once it is ready.
pub fn spawn_model_loader(service: Arc<DepthService>, config: ModelConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let model = match DepthModel::new(&config, service.status()).await {
            Ok(model) => model,
            Err(e) => {
                log::error!("Failed to load depth model: {e:#}");
                service.status().set(ModelState::Failed {
                    reason: format!("{e:#}"),
                });
                return;
            }
        };

        match Inferer::spawn(Box::new(model)) {
            // The worker thread is detached, it ends with the last handle
            Ok((handle, _worker)) => service.install(handle),
            Err(e) => {
                log::error!("Failed to start inference worker: {e}");
                service.status().set(ModelState::Failed {
                    reason: e.to_string(),
                });
            }
        }
    })
}
