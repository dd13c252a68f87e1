use std::path::PathBuf;

use thiserror::Error;

/// Wire framing failures. Per-frame recoverable: the offending datagram is
/// dropped and the ingress loop continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: have {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },

    #[error("unknown protocol tag 0x{0:02X}")]
    UnknownTag(u8),

    #[error("declared payload length {declared} does not match {actual} carried bytes")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Configuration failures. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Per-message routing failures. The message is dropped and logged; nothing
/// is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no camera with id {0}")]
    UnknownCamera(u8),

    #[error("camera {0} command queue is full")]
    QueueFull(u8),

    #[error("camera {0} is disconnected")]
    Disconnected(u8),
}
