//! Depth server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use depth_server::{
    data_socket::spawn_data_socket,
    endpoints::router,
    meter::spawn_meter_logger,
    nn::{ModelConfig, DEFAULT_INPUT_SIZE, DEFAULT_MODEL_URL},
    service::{spawn_model_loader, DepthService},
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP server on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the data socket for camera clients
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Local ONNX depth model, downloaded from `model_url` if not given
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// URL to download the ONNX depth model from
    #[clap(long, default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    /// Width of the model input
    #[clap(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_width: u32,

    /// Height of the model input
    #[clap(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_height: u32,

    /// Seconds between throughput log lines
    #[clap(long, default_value_t = 10)]
    meter_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let service = Arc::new(DepthService::new());

    // The model loads in the background, requests fail with 503 until it is ready
    spawn_model_loader(
        Arc::clone(&service),
        ModelConfig {
            path: args.model_path,
            url: args.model_url,
            width: args.input_width,
            height: args.input_height,
        },
    );

    // Create socket to receive snapshots via network
    spawn_data_socket(Arc::clone(&service), &args.socket_address).await?;

    spawn_meter_logger(Duration::from_secs(args.meter_interval.max(1)));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(service).into_make_service())
        .await?;

    Ok(())
}
