//! Clock subscription seam

use address_space::TransportError;
use async_trait::async_trait;
use simulation_clock::{ClockHandle, ClockSubscription};

/// Anything an adapter can subscribe to for clock ticks
#[async_trait]
pub trait ClockSource: Send + Sync {
    async fn subscribe(&self) -> Result<ClockSubscription, TransportError>;
}

#[async_trait]
impl ClockSource for ClockHandle {
    async fn subscribe(&self) -> Result<ClockSubscription, TransportError> {
        ClockHandle::subscribe(self)
    }
}
