use std::path::PathBuf;
use thiserror::Error;

/// The inbound payload was not a recognised JSON event.
#[derive(Error, Debug)]
#[error("Malformed payload: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

/// A well-formed event that the connection's current state does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("Chat message sent before login")]
    ChatBeforeLogin,
    #[error("Username must not be empty")]
    EmptyUsername,
}

/// Delivery to a single recipient failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("Outbound channel closed")]
    Closed,
    #[error("Outbound queue full")]
    Backpressured,
    #[error("Outbound event could not be encoded")]
    Encode,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Socket(#[from] warp::Error),
}

/// Why a session dropped an inbound payload.
#[derive(Error, Debug)]
pub enum InboundError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No certificate found in {0}")]
    NoCertificates(PathBuf),
    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),
}
