// Granularity aggregator - normalizes raw readings into a renderable series
use crate::domain::granularity::{Direction, GranularityLevel};
use crate::domain::reading::Reading;
use crate::domain::series::SeriesPoint;
use chrono::DateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Group name the backend uses for an unsegmented payload.
pub const UNSEGMENTED_GROUP: &str = "all";
pub const DEFAULT_SUPER_LABEL: &str = "All";

/// Named batch of readings, as returned by a historical query.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingGroup {
    pub name: String,
    pub readings: Vec<Reading>,
}

impl ReadingGroup {
    pub fn new(name: impl Into<String>, readings: Vec<Reading>) -> Self {
        Self {
            name: name.into(),
            readings,
        }
    }

    #[cfg(test)]
    pub fn unsegmented(readings: Vec<Reading>) -> Self {
        Self::new(UNSEGMENTED_GROUP, readings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSeries {
    pub points: Vec<SeriesPoint>,
    pub super_labels: Vec<String>,
}

/// Flattens every group into one sorted, deduplicated series plus the
/// coarser axis labels shown beneath it.
pub fn aggregate(groups: &[ReadingGroup], level: GranularityLevel) -> AggregatedSeries {
    let points = series_points(groups.iter().flat_map(|group| group.readings.iter()));
    let super_labels = super_labels(groups, &points, level);
    AggregatedSeries {
        points,
        super_labels,
    }
}

/// Same normalization per series. Series left with no valid points are kept
/// as empty entries so the caller can still show them as "no data".
///
/// Normalization is identical at every level; super labels are only derived
/// for a single series.
pub fn aggregate_multiple<K: Ord>(
    per_series: BTreeMap<K, Vec<Reading>>,
    _level: GranularityLevel,
) -> BTreeMap<K, Vec<SeriesPoint>> {
    per_series
        .into_iter()
        .map(|(id, readings)| (id, series_points(readings.iter())))
        .collect()
}

fn series_points<'a>(readings: impl Iterator<Item = &'a Reading>) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = readings
        .filter_map(|reading| match reading {
            Reading::Scalar { value, .. } => {
                reading.timestamp_ms().map(|time_ms| SeriesPoint::new(time_ms, *value))
            }
            _ => None,
        })
        .collect();

    // stable: equal timestamps keep their arrival order
    points.sort_by_key(|point| point.time_ms);
    dedupe_within_timestamp(points)
}

/// Drops repeats of a (time, value) pair, keeping the first occurrence.
/// Points are sorted, so duplicates can only sit in the same timestamp run.
fn dedupe_within_timestamp(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    let mut kept = Vec::with_capacity(points.len());
    let mut seen = HashSet::new();
    let mut run = None;
    for point in points {
        if run != Some(point.time_ms) {
            run = Some(point.time_ms);
            seen.clear();
        }
        if seen.insert(point.dedupe_key()) {
            kept.push(point);
        }
    }
    kept
}

fn super_labels(
    groups: &[ReadingGroup],
    points: &[SeriesPoint],
    level: GranularityLevel,
) -> Vec<String> {
    let segmented = match groups {
        [single] => !single.name.eq_ignore_ascii_case(UNSEGMENTED_GROUP),
        _ => true,
    };
    if segmented {
        return groups.iter().map(|group| group.name.clone()).collect();
    }

    if points.is_empty() || !matches!(level, GranularityLevel::Minute | GranularityLevel::Year) {
        return vec![DEFAULT_SUPER_LABEL.to_string()];
    }

    // Labels follow the data, so a gap in coverage leaves no label for the gap.
    let super_level = level.step(Direction::Up);
    let format = match super_level {
        GranularityLevel::Year => "%Y",
        _ => "%d %b %Y",
    };

    let mut labels = Vec::new();
    let mut last_bucket = None;
    for point in points {
        let bucket = super_level.align(point.time_ms);
        if last_bucket == Some(bucket) {
            continue;
        }
        last_bucket = Some(bucket);
        if let Some(start) = DateTime::from_timestamp_millis(bucket) {
            labels.push(start.format(format).to_string());
        }
    }
    labels
}
