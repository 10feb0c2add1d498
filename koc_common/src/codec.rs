use bincode::Options;
use thiserror::Error;

use crate::packet::Packet;

/// Upper bound for one encoded packet. Even an incompressible 640x480 video +
/// depth frame stays near 1.5 MiB.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

#[derive(Error, Debug)]
#[error("failed to encode packet: {0}")]
pub struct EncodeError(#[from] bincode::Error);

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_LEN as u64)
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(options().serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(options().deserialize(data)?)
    }
}
