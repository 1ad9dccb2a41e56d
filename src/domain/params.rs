// Feed addressing and control parameters
use serde::{Deserialize, Serialize};

/// Identifies which physical sensor a live feed watches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingParams {
    #[serde(default)]
    pub facility: String,
    #[serde(default, rename = "box")]
    pub sensor_box: String,
    #[serde(default)]
    pub sensor: String,
}

impl AddressingParams {
    pub fn new(facility: &str, sensor_box: &str, sensor: &str) -> Self {
        Self {
            facility: facility.to_string(),
            sensor_box: sensor_box.to_string(),
            sensor: sensor.to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.facility.trim().is_empty()
            && !self.sensor_box.trim().is_empty()
            && !self.sensor.trim().is_empty()
    }
}

/// Tuning knobs for a feed. Unset fields keep their previous value on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlParams {
    #[serde(default)]
    pub frequency_ms: Option<u64>,
    #[serde(default)]
    pub buffer_ms: Option<u64>,
    #[serde(default)]
    pub aggregation_metric: Option<String>,
}

impl ControlParams {
    pub fn merge(&mut self, incoming: ControlParams) {
        if incoming.frequency_ms.is_some() {
            self.frequency_ms = incoming.frequency_ms;
        }
        if incoming.buffer_ms.is_some() {
            self.buffer_ms = incoming.buffer_ms;
        }
        if incoming.aggregation_metric.is_some() {
            self.aggregation_metric = incoming.aggregation_metric;
        }
    }
}
