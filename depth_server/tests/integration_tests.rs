use std::{io::Cursor, net::SocketAddr, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use common::protocol::{ProtoMsg, SnapshotMsg, MAX_FRAME_BYTES};
use depth_server::{
    data_socket::spawn_data_socket,
    endpoints::{router, DEPTH_HEIGHT_HEADER, DEPTH_WIDTH_HEADER},
    inferer::Inferer,
    nn::{DepthEstimator, DepthTensor},
    service::DepthService,
};
use futures::{SinkExt, StreamExt};
use image::{ImageOutputFormat, Rgb, RgbImage};
use reqwest::{multipart, StatusCode};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Uses the brightness of every pixel as depth.
struct LumaEstimator;

impl DepthEstimator for LumaEstimator {
    fn estimate(&self, input: &RgbImage) -> Result<DepthTensor> {
        let luma = image::imageops::grayscale(input);
        Ok(DepthTensor {
            dims: vec![1, luma.height() as usize, luma.width() as usize],
            data: luma.pixels().map(|p| p[0] as f32).collect(),
        })
    }
}

fn ready_service() -> Result<Arc<DepthService>> {
    let service = Arc::new(DepthService::new());
    let (handle, _worker) = Inferer::spawn(Box::new(LumaEstimator))?;
    service.install(handle);
    Ok(service)
}

fn test_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let level = ((x + y) * 255 / (width + height - 2)) as u8;
        Rgb([level, level, level])
    });
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

fn serve(service: Arc<DepthService>) -> Result<SocketAddr> {
    let server = axum::Server::try_bind(&"127.0.0.1:0".parse()?)?
        .serve(router(service).into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    Ok(addr)
}

/// Incompressible image, so the encoded PNG is about as large as its raw pixels.
fn noise_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let mut state = 0x2545_f491_u32;
    let image = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

async fn connect_socket(addr: SocketAddr) -> Result<Framed<TcpStream, LengthDelimitedCodec>> {
    let stream = TcpStream::connect(addr).await?;
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    Ok(Framed::new(stream, codec))
}

async fn post_image(addr: SocketAddr, query: &str, data: Vec<u8>) -> Result<reqwest::Response> {
    let form = multipart::Form::new().part("image", multipart::Part::bytes(data));
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/depth{query}"))
        .multipart(form)
        .send()
        .await?;
    Ok(resp)
}

#[tokio::test]
async fn test_healthcheck_and_status() -> Result<()> {
    let addr = serve(Arc::new(DepthService::new()))?;

    let body = reqwest::get(format!("http://{addr}/healthcheck"))
        .await?
        .text()
        .await?;
    assert_eq!(body, "healthy");

    let status: serde_json::Value =
        serde_json::from_slice(&reqwest::get(format!("http://{addr}/status")).await?.bytes().await?)?;
    assert_eq!(status["state"], "pending");

    let page = reqwest::get(format!("http://{addr}/")).await?.text().await?;
    assert!(page.contains("depth-map-canvas"));

    Ok(())
}

#[tokio::test]
async fn test_upload_before_model_is_ready() -> Result<()> {
    let addr = serve(Arc::new(DepthService::new()))?;

    let resp = post_image(addr, "", test_png(4, 4)?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    Ok(())
}

#[tokio::test]
async fn test_upload_returns_depth_png() -> Result<()> {
    let addr = serve(ready_service()?)?;

    let resp = post_image(addr, "", test_png(6, 4)?).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.headers()[DEPTH_WIDTH_HEADER], "6");
    assert_eq!(resp.headers()[DEPTH_HEIGHT_HEADER], "4");

    let depth = image::load_from_memory(&resp.bytes().await?)?.to_rgba8();
    assert_eq!(depth.dimensions(), (6, 4));
    // Darkest corner is nearest to black, brightest to white
    assert_eq!(depth[(0, 0)].0, [0, 0, 0, 255]);
    assert_eq!(depth[(5, 3)].0, [255, 255, 255, 255]);

    let status: serde_json::Value =
        serde_json::from_slice(&reqwest::get(format!("http://{addr}/status")).await?.bytes().await?)?;
    assert_eq!(status["state"], "ready");

    Ok(())
}

#[tokio::test]
async fn test_upload_errors() -> Result<()> {
    let addr = serve(ready_service()?)?;

    let resp = post_image(addr, "", b"this is not an image".to_vec()).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = post_image(addr, "", Vec::new()).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // A failed image does not affect the next one
    let resp = post_image(addr, "?fit_input=true", test_png(3, 3)?).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_data_socket_snapshot() -> Result<()> {
    let (addr, _socket) = spawn_data_socket(ready_service()?, "127.0.0.1:0").await?;

    let mut transport = connect_socket(addr).await?;

    let connect = ProtoMsg::ConnectReq("tester".into());
    transport.send(Bytes::from(connect.serialize()?)).await?;

    let snapshot = ProtoMsg::SnapshotMsg(SnapshotMsg::new("first".into(), test_png(5, 2)?, false));
    transport.send(Bytes::from(snapshot.serialize()?)).await?;

    let snapshot = ProtoMsg::SnapshotMsg(SnapshotMsg::new("second".into(), vec![1, 2, 3], false));
    transport.send(Bytes::from(snapshot.serialize()?)).await?;

    match ProtoMsg::deserialize(&transport.next().await.expect("reply")?)? {
        ProtoMsg::DepthMsg(msg) => {
            assert_eq!(msg.id, "first");
            assert_eq!((msg.width, msg.height), (5, 2));
            let depth = image::load_from_memory(&msg.png)?;
            assert_eq!((depth.width(), depth.height()), (5, 2));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    match ProtoMsg::deserialize(&transport.next().await.expect("reply")?)? {
        ProtoMsg::ErrorMsg(msg) => {
            assert_eq!(msg.id, "second");
            assert!(msg.reason.contains("decode"));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_data_socket_requires_connect() -> Result<()> {
    let (addr, _socket) = spawn_data_socket(ready_service()?, "127.0.0.1:0").await?;

    let mut transport = connect_socket(addr).await?;

    let snapshot = ProtoMsg::SnapshotMsg(SnapshotMsg::new("early".into(), test_png(2, 2)?, false));
    transport.send(Bytes::from(snapshot.serialize()?)).await?;

    // Server drops the connection without a reply
    assert!(!matches!(transport.next().await, Some(Ok(_))));

    Ok(())
}

#[tokio::test]
async fn test_data_socket_large_snapshot() -> Result<()> {
    let (addr, _socket) = spawn_data_socket(ready_service()?, "127.0.0.1:0").await?;
    let mut transport = connect_socket(addr).await?;

    let image = noise_png(1800, 1800)?;
    // Above the 8 MiB default frame limit of the codec
    assert!(image.len() > 8 * 1024 * 1024);

    let connect = ProtoMsg::ConnectReq("tester".into());
    transport.send(Bytes::from(connect.serialize()?)).await?;
    let snapshot = ProtoMsg::SnapshotMsg(SnapshotMsg::new("large".into(), image, false));
    transport.send(Bytes::from(snapshot.serialize()?)).await?;

    match ProtoMsg::deserialize(&transport.next().await.expect("reply")?)? {
        ProtoMsg::DepthMsg(msg) => {
            assert_eq!(msg.id, "large");
            assert_eq!((msg.width, msg.height), (1800, 1800));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_data_socket_drops_undecodable_message() -> Result<()> {
    let (addr, _socket) = spawn_data_socket(ready_service()?, "127.0.0.1:0").await?;
    let mut transport = connect_socket(addr).await?;

    let connect = ProtoMsg::ConnectReq("tester".into());
    transport.send(Bytes::from(connect.serialize()?)).await?;
    transport.send(Bytes::from_static(&[0xff; 5])).await?;

    // No reply can name the message, so the server closes the connection
    assert!(!matches!(transport.next().await, Some(Ok(_))));

    Ok(())
}
