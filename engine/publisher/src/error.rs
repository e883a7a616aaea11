//! Error types for the Publisher

use address_space::AddressSpaceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Address space error: {0}")]
    AddressSpace(#[from] AddressSpaceError),

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("A subscription needs at least one item")]
    EmptyItemList,

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(u64),

    #[error("Subscription limit of {0} reached")]
    TooManySubscriptions(usize),
}
