//! # Address Space
//!
//! A hierarchical namespace of named, typed values with change subscriptions.
//! Sensor adapters, the simulated clock and the integration publisher all
//! expose their state here; observers read values or subscribe to sampled
//! change streams.
//!
//! Node ids follow the `ns=<namespace>;i=<id>` convention. Namespaces 0 and 1
//! are reserved, so the first namespace registered by an application is 2 and
//! ids inside each namespace start at 1.

pub mod error;
pub mod monitor;
pub mod node;
pub mod retry;
pub mod space;

pub use error::{AddressSpaceError, TransportError};
pub use monitor::MonitoredItem;
pub use node::{DataValue, NodeClass, NodeId, Variant};
pub use retry::RetryPolicy;
pub use space::AddressSpace;
