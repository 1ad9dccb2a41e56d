// Time series points and the bounded live buffer
use serde::Serialize;
use std::collections::VecDeque;

pub const LIVE_SERIES_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }

    /// Identity used when collapsing duplicates after sorting.
    pub fn dedupe_key(&self) -> (i64, u64) {
        (self.time_ms, self.value.to_bits())
    }
}

/// Sliding window over the most recent live points.
#[derive(Debug, Clone)]
pub struct LiveSeries {
    capacity: usize,
    points: VecDeque<SeriesPoint>,
}

impl LiveSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: SeriesPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_vec(&self) -> Vec<SeriesPoint> {
        self.points.iter().copied().collect()
    }
}

impl Default for LiveSeries {
    fn default() -> Self {
        Self::new(LIVE_SERIES_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_series_keeps_last_thirty() {
        let mut series = LiveSeries::default();
        for i in 0..45 {
            series.push(SeriesPoint::new(i * 1_000, i as f64));
        }

        let points = series.to_vec();
        assert_eq!(points.len(), 30);
        assert_eq!(points.first().unwrap().time_ms, 15_000);
        assert_eq!(points.last().unwrap().time_ms, 44_000);
    }

    #[test]
    fn test_live_series_clear() {
        let mut series = LiveSeries::new(3);
        series.push(SeriesPoint::new(1, 1.0));
        series.clear();
        assert!(series.is_empty());
    }
}
