use std::time::Duration;

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("outgoing buffer full")]
    Full,
    #[error("channel closed")]
    Closed,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
