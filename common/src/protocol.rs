//! Protocol definition for the data socket.
//!
//! A client opens the connection with [`ProtoMsg::ConnectReq`] and then sends any number of
//! [`SnapshotMsg`]s. Every snapshot is answered with either a [`DepthMsg`] or an [`ErrorMsg`]
//! carrying the same `id`.
use serde::{Deserialize, Serialize};

/// Largest encoded image accepted for depth estimation.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Largest frame on the data socket: an image or depth map plus message overhead.
pub const MAX_FRAME_BYTES: usize = MAX_IMAGE_BYTES + 64 * 1024;

/// Definition of protocol messages.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub enum ProtoMsg {
    ConnectReq(String),
    SnapshotMsg(SnapshotMsg),
    DepthMsg(DepthMsg),
    ErrorMsg(ErrorMsg),
}

/// Encoded image (JPEG, PNG, ...) to run depth estimation on.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SnapshotMsg {
    pub id: String,
    pub data: Vec<u8>,
    /// Scale the depth map back to the size of the snapshot.
    pub fit_input: bool,
}

impl SnapshotMsg {
    pub fn new(id: String, data: Vec<u8>, fit_input: bool) -> Self {
        Self {
            id,
            data,
            fit_input,
        }
    }
}

/// Grayscale depth map of a snapshot, PNG encoded.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DepthMsg {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Processing of a snapshot failed.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorMsg {
    pub id: String,
    pub reason: String,
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn test_bincode_serde() -> Result<(), Error> {
        let msg = ProtoMsg::SnapshotMsg(SnapshotMsg::new("bla".into(), vec![1, 2, 3], true));

        let serialized: Vec<u8> = msg.serialize()?;
        let deserialized_msg = ProtoMsg::deserialize(&serialized[..])?;

        assert_eq!(msg, deserialized_msg);

        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ProtoMsg::deserialize(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
