//! Client side of the `depth_server` data socket.
//!
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use common::protocol::{DepthMsg, ProtoMsg, SnapshotMsg, MAX_FRAME_BYTES};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Connection to the data socket of a depth server.
pub struct DepthClient {
    transport: Framed<TcpStream, LengthDelimitedCodec>,
}

impl DepthClient {
    /// Connect and announce ourselves as `name`.
    pub async fn connect(addr: &str, name: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        log::info!("Connected to {addr}");

        let mut client = Self {
            transport: Framed::new(
                stream,
                LengthDelimitedCodec::builder()
                    .max_frame_length(MAX_FRAME_BYTES)
                    .new_codec(),
            ),
        };
        client.send(&ProtoMsg::ConnectReq(name.to_owned())).await?;

        Ok(client)
    }

    /// Send an encoded image and wait for its depth map.
    pub async fn request_depth(
        &mut self,
        id: &str,
        image: Vec<u8>,
        fit_input: bool,
    ) -> Result<DepthMsg> {
        let snapshot = SnapshotMsg::new(id.to_owned(), image, fit_input);
        self.send(&ProtoMsg::SnapshotMsg(snapshot)).await?;

        let data = match self.transport.next().await {
            Some(data) => data?,
            None => bail!("server closed the connection"),
        };

        match ProtoMsg::deserialize(&data)? {
            ProtoMsg::DepthMsg(msg) if msg.id == id => Ok(msg),
            ProtoMsg::ErrorMsg(msg) if msg.id == id => {
                bail!("server failed to process {id}: {}", msg.reason)
            }
            _ => bail!("unexpected reply for {id}"),
        }
    }

    async fn send(&mut self, msg: &ProtoMsg) -> Result<()> {
        self.transport.send(Bytes::from(msg.serialize()?)).await?;
        Ok(())
    }
}
