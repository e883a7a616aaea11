//! Error types for source adapters

use address_space::{AddressSpaceError, TransportError};
use thiserror::Error;

/// Errors that stop an adapter
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Address space error: {0}")]
    AddressSpace(#[from] AddressSpaceError),

    #[error("Clock transport failed: {0}")]
    Transport(#[from] TransportError),
}
