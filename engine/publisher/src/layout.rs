//! Integration object layout

use address_space::{AddressSpace, AddressSpaceError, NodeId, Variant};
use aggregator::ConsolidatedRecord;
use chrono::NaiveDateTime;

pub const RAINFALL: &str = "Rainfall_mm_h";
pub const DISCHARGE: &str = "Discharge_m3_s";
pub const SIMULATED_TIME: &str = "SimulatedTime";
pub const ALERT_STATE: &str = "AlertState";
pub const STATION_STATUS: &str = "StationStatus";

/// Published items in node creation order
pub const ITEM_NAMES: [&str; 5] = [RAINFALL, DISCHARGE, SIMULATED_TIME, ALERT_STATE, STATION_STATUS];

/// Node ids of the integration object and its variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrationNodes {
    pub namespace: u16,
    pub object: NodeId,
    pub rainfall: NodeId,
    pub discharge: NodeId,
    pub simulated_time: NodeId,
    pub alert_state: NodeId,
    pub station_status: NodeId,
}

impl IntegrationNodes {
    pub(crate) fn create(
        space: &AddressSpace,
        namespace_uri: &str,
        object_name: &str,
    ) -> Result<Self, AddressSpaceError> {
        let namespace = space.register_namespace(namespace_uri);
        let object = space.add_object(space.objects_folder(), namespace, object_name)?;
        Ok(Self {
            namespace,
            object,
            rainfall: space.add_variable(object, namespace, RAINFALL, 0.0)?,
            discharge: space.add_variable(object, namespace, DISCHARGE, 0.0)?,
            simulated_time: space.add_variable(object, namespace, SIMULATED_TIME, NaiveDateTime::default())?,
            alert_state: space.add_variable(object, namespace, ALERT_STATE, false)?,
            station_status: space.add_variable(object, namespace, STATION_STATUS, "")?,
        })
    }

    pub fn node(&self, name: &str) -> Option<NodeId> {
        match name {
            RAINFALL => Some(self.rainfall),
            DISCHARGE => Some(self.discharge),
            SIMULATED_TIME => Some(self.simulated_time),
            ALERT_STATE => Some(self.alert_state),
            STATION_STATUS => Some(self.station_status),
            _ => None,
        }
    }

    pub(crate) fn writes(&self, record: &ConsolidatedRecord) -> [(NodeId, Variant); 5] {
        [
            (self.rainfall, Variant::Double(record.rainfall)),
            (self.discharge, Variant::Double(record.discharge)),
            (self.simulated_time, Variant::DateTime(record.timestamp)),
            (self.alert_state, Variant::Boolean(record.alert)),
            (self.station_status, Variant::String(record.station_status.clone().unwrap_or_default())),
        ]
    }
}
