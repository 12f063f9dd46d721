//! Data socket module to receive camera snapshots via network.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::protocol::{DepthMsg, ErrorMsg, ProtoMsg, SnapshotMsg, MAX_FRAME_BYTES};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{inferer::RenderOptions, service::DepthService};

/// Bind the data socket and serve every connection in its own task.
///
/// Returns the bound address, which differs from `addr` when binding to port 0.
pub async fn spawn_data_socket(
    service: Arc<DepthService>,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    let local_addr = listener.local_addr()?;
    log::info!("Data socket listening on {local_addr}");

    let handle = tokio::spawn(async move {
        loop {
            let socket = match listener.accept().await {
                Ok((socket, _peer_addr)) => socket,
                Err(e) => {
                    log::warn!("Failed to accept TCP connection: {e}");
                    continue;
                }
            };
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                if let Err(e) = handle_incoming(service, socket).await {
                    log::warn!("Data socket connection closed: {e:#}");
                }
            });
        }
    });

    Ok((local_addr, handle))
}

async fn handle_incoming(service: Arc<DepthService>, stream: TcpStream) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let mut transport = Framed::new(
        stream,
        LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_BYTES)
            .new_codec(),
    );

    let client_name = match transport.next().await {
        Some(Ok(data)) => match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::ConnectReq(name)) => name,
            _ => bail!("{addr}: expected connect request"),
        },
        _ => bail!("{addr}: no connect request"),
    };
    log::info!("{addr}: Client {client_name} connected");

    while let Some(frame) = transport.next().await {
        let data = frame?;
        let reply = match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::SnapshotMsg(snapshot)) => handle_snapshot(&service, snapshot).await,
            // Without an id there is nothing to answer, the client would wait forever
            Ok(_) => bail!("{addr}: unexpected message from {client_name}"),
            Err(e) => bail!("{addr}: undecodable message from {client_name}: {e}"),
        };
        transport.send(Bytes::from(reply.serialize()?)).await?;
    }

    log::info!("{addr}: Client {client_name} disconnected");
    Ok(())
}

async fn handle_snapshot(service: &DepthService, snapshot: SnapshotMsg) -> ProtoMsg {
    let SnapshotMsg {
        id,
        data,
        fit_input,
    } = snapshot;
    log::debug!("Snapshot {id} ({} bytes)", data.len());

    match service.process(data, RenderOptions { fit_input }).await {
        Ok(depth_map) => ProtoMsg::DepthMsg(DepthMsg {
            id,
            width: depth_map.width,
            height: depth_map.height,
            png: depth_map.png,
        }),
        Err(e) => ProtoMsg::ErrorMsg(ErrorMsg {
            id,
            reason: e.to_string(),
        }),
    }
}
