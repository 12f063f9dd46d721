use std::path::PathBuf;

use anyhow::{anyhow, Result};
use cam_snapshot::{
    client::DepthClient,
    sensors::{CameraSettings, SnapshotCamera},
};
use clap::Parser;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the depth server data socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Name to announce to the server
    #[clap(long, default_value = "cam_snapshot")]
    name: String,

    /// Send this image file instead of taking a camera snapshot
    #[clap(long)]
    image: Option<PathBuf>,

    /// Video device to take the snapshot with
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Frame format of the camera, has to be an encoded image format
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture resolution as `WIDTHxHEIGHT`, highest supported if not given
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Frames to drop before the snapshot
    #[clap(long, default_value_t = 5)]
    warmup_frames: u32,

    /// Scale the depth map to the size of the snapshot
    #[clap(long)]
    fit_input: bool,

    /// Where to write the depth map
    #[clap(long, default_value = "depth.png")]
    output: PathBuf,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let width = width.parse().map_err(|e| format!("invalid width: {e}"))?;
    let height = height.parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let (id, image) = match &args.image {
        Some(path) => (path.display().to_string(), tokio::fs::read(path).await?),
        None => {
            let settings = CameraSettings {
                device: args.device.clone(),
                format: args.format.clone(),
                resolution: args.resolution,
                frame_rate: None,
                warmup_frames: args.warmup_frames,
            };
            // Camera access is blocking
            let frame = tokio::task::spawn_blocking(move || {
                let mut cam = SnapshotCamera::open(&settings)?;
                let frame = cam.snap()?;
                cam.close()?;
                Ok::<_, cam_snapshot::Error>(frame)
            })
            .await?
            .map_err(|e| anyhow!(e))?;
            (args.device.clone(), frame)
        }
    };
    log::info!("Sending {id} ({} bytes)", image.len());

    let mut client = DepthClient::connect(&args.socket_address, &args.name).await?;
    let depth = client.request_depth(&id, image, args.fit_input).await?;

    tokio::fs::write(&args.output, &depth.png).await?;
    log::info!(
        "Wrote {}x{} depth map to {}",
        depth.width,
        depth.height,
        args.output.display()
    );

    Ok(())
}
