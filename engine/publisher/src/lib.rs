//! # Publisher
//!
//! Exposes the consolidated record under the `Integration` object of the
//! address space and fans data-change notifications out to observers.
//!
//! Every subscription owns an unbounded queue and a delivery task, so a slow
//! observer only delays its own notifications. A subscription whose observer
//! goes away, or stops accepting notifications within the delivery timeout,
//! is closed and removed.

mod config;
mod error;
mod layout;
mod publisher;
mod subscription;

pub use config::PublisherConfig;
pub use error::PublisherError;
pub use layout::{IntegrationNodes, ALERT_STATE, DISCHARGE, ITEM_NAMES, RAINFALL, SIMULATED_TIME, STATION_STATUS};
pub use publisher::{Publisher, PublisherStats};
pub use subscription::{DataChangeNotification, ItemChange, Subscription, SubscriptionState};

#[cfg(test)]
mod tests;
