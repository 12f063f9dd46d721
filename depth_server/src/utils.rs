//! Utility functions
//!
use std::{io::Cursor, path::Path};

use anyhow::{bail, Result};
use futures::StreamExt;
use image::RgbImage;
use reqwest::Client;
use tokio::{fs::File, io::AsyncWriteExt};

/// Start of every JPEG file (SOI marker followed by the next marker prefix).
const JPEG_MAGIC: [u8; 3] = [0xff, 0xd8, 0xff];

/// Most pixels a decoded image may have, roughly an 8K frame with room to spare.
pub const MAX_IMAGE_PIXELS: u64 = 50_000_000;

/// Download a file from a URL to a given filepath.
///
/// `on_progress` receives the progress in percent whenever a chunk arrived and the server
/// announced the content length. The file only appears at `filepath` once it is complete.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
    mut on_progress: impl FnMut(f32),
) -> Result<()> {
    let filepath = filepath.as_ref();
    let resp = client.get(url).send().await?.error_for_status()?;
    let total = resp.content_length().filter(|len| *len > 0);

    let partial = filepath.with_extension("part");
    let mut file = File::create(&partial).await?;
    let mut received: u64 = 0;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        if let Some(total) = total {
            on_progress(received as f32 * 100.0 / total as f32);
        }
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, filepath).await?;

    Ok(())
}

/// Decode an encoded image into RGB.
///
/// JPEGs (camera snapshots, most uploads) go through libjpeg-turbo, everything else through
/// the decoders of the `image` crate. The header is checked against [`MAX_IMAGE_PIXELS`]
/// before any pixel buffer is allocated.
pub fn decode_image(data: &[u8]) -> Result<RgbImage> {
    if data.starts_with(&JPEG_MAGIC) {
        let header = turbojpeg::read_header(data)?;
        check_pixel_count(header.width as u64, header.height as u64)?;
        Ok(turbojpeg::decompress_image(data)?)
    } else {
        let (width, height) = image::io::Reader::new(Cursor::new(data))
            .with_guessed_format()?
            .into_dimensions()?;
        check_pixel_count(width.into(), height.into())?;
        Ok(image::load_from_memory(data)?.to_rgb8())
    }
}

fn check_pixel_count(width: u64, height: u64) -> Result<()> {
    if width.saturating_mul(height) > MAX_IMAGE_PIXELS {
        bail!("image too large: {width}x{height} exceeds {MAX_IMAGE_PIXELS} pixels");
    }
    Ok(())
}
