use std::io;

use crate::flow::DeviceId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("device {0} is not ready")]
    UnknownDevice(DeviceId),

    #[error("southbound error: {0}")]
    Southbound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
