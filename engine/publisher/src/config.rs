//! Configuration for the Publisher

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PublisherError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Namespace the integration object is registered under
    pub namespace_uri: String,

    /// Browse name of the integration object
    pub object_name: String,

    /// How long a flush may wait for the observer before the subscription is
    /// considered lost, in milliseconds
    pub delivery_timeout_ms: u64,

    pub max_subscriptions: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            namespace_uri: "urn:hydro-monitor:integration".to_string(),
            object_name: "Integration".to_string(),
            delivery_timeout_ms: 5000,
            max_subscriptions: 256,
        }
    }
}

impl PublisherConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), PublisherError> {
        if self.namespace_uri.trim().is_empty() {
            return Err(PublisherError::Config("namespace_uri must not be empty".into()));
        }
        if self.object_name.trim().is_empty() {
            return Err(PublisherError::Config("object_name must not be empty".into()));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(PublisherError::Config("delivery_timeout_ms must be greater than 0".into()));
        }
        if self.max_subscriptions == 0 {
            return Err(PublisherError::Config("max_subscriptions must be greater than 0".into()));
        }
        Ok(())
    }
}
