use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to spawn application: {0}")]
    Spawn(#[source] io::Error),
    #[error("application protocol error: {0}")]
    Protocol(#[from] io::Error),
    #[error("application handshake failed: {0}")]
    Handshake(String),
}
