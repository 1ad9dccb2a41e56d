// Live view - per-shape consumer state fed by the stream manager
use crate::domain::reading::{Device, Reading};
use crate::domain::series::{LiveSeries, SeriesPoint};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub series: Vec<SeriesPoint>,
    pub matrix: Option<Vec<Vec<f64>>>,
    pub devices: Vec<Device>,
    pub last_update: Option<String>,
}

/// Routes readings by shape: scalars into a sliding series, matrices and
/// device lists into "latest" slots.
#[derive(Debug, Clone)]
pub struct LiveView {
    series: LiveSeries,
    matrix: Option<Vec<Vec<f64>>>,
    devices: Vec<Device>,
    last_update: Option<String>,
}

impl LiveView {
    pub fn new(series_window: usize) -> Self {
        Self {
            series: LiveSeries::new(series_window),
            matrix: None,
            devices: Vec::new(),
            last_update: None,
        }
    }

    /// Scalars need a parseable time to land on the series axis; returns
    /// `false` when the reading was dropped.
    pub fn apply(&mut self, reading: &Reading) -> bool {
        match reading {
            Reading::Scalar { value, .. } => {
                let Some(time_ms) = reading.timestamp_ms() else {
                    return false;
                };
                self.series.push(SeriesPoint::new(time_ms, *value));
            }
            Reading::Matrix { value, .. } => self.matrix = Some(value.clone()),
            Reading::Devices { devices, .. } => self.devices = devices.clone(),
        }
        self.last_update = Some(reading.time().to_string());
        true
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.matrix = None;
        self.devices.clear();
        self.last_update = None;
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            series: self.series.to_vec(),
            matrix: self.matrix.clone(),
            devices: self.devices.clone(),
            last_update: self.last_update.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_by_shape() {
        let mut view = LiveView::new(30);
        assert!(view.apply(&Reading::scalar_at(60_000, 20.0)));
        assert!(view.apply(&Reading::Matrix {
            time: "2024-01-01T00:00:00Z".to_string(),
            value: vec![vec![1.0]],
        }));
        assert!(view.apply(&Reading::Devices {
            time: "2024-01-01T00:01:00Z".to_string(),
            devices: vec![Device {
                id: "A1".to_string(),
                signal: -60.0
            }],
        }));

        let snapshot = view.snapshot();
        assert_eq!(snapshot.series, vec![SeriesPoint::new(60_000, 20.0)]);
        assert_eq!(snapshot.matrix, Some(vec![vec![1.0]]));
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.last_update.as_deref(), Some("2024-01-01T00:01:00Z"));
    }

    #[test]
    fn test_scalar_without_time_is_dropped() {
        let mut view = LiveView::new(30);
        let reading = Reading::Scalar {
            time: "not a time".to_string(),
            value: 1.0,
        };
        assert!(!view.apply(&reading));
        assert!(view.snapshot().series.is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut view = LiveView::new(30);
        view.apply(&Reading::scalar_at(60_000, 20.0));
        view.clear();
        assert_eq!(view.snapshot(), LiveSnapshot::default());
    }
}
