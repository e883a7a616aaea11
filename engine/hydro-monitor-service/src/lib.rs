//! Hydro Monitor Service Library
//!
//! Configuration, logging, signal handling and bootstrap for the replay
//! pipeline: one simulated clock, one source adapter per dataset, the
//! aggregator, the integration publisher and a console dashboard observer.

pub mod config;
pub mod dashboard;
pub mod logging;
pub mod service;
pub mod signals;


pub use crate::config::{load_config, ConfigOverrides, ServiceConfig, ServiceConfigError, DEFAULT_CONFIG_FILE};
pub use crate::dashboard::{Dashboard, DashboardSample, DASHBOARD_ITEMS};
pub use crate::logging::initialize_logging;
pub use crate::service::{ServiceState, ServiceTask};
pub use crate::signals::{graceful_shutdown, setup_signal_handlers};
