// Historical service - fetch a range and shape it for the chart renderer
use crate::application::aggregator::{aggregate, aggregate_multiple};
use crate::application::historical_source::{ComparisonQuery, HistoricalQuery, HistoricalSource};
use crate::domain::granularity::{AxisBounds, GranularityLevel};
use crate::domain::reading::Reading;
use crate::domain::series::SeriesPoint;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalView {
    pub sensor_type: String,
    pub granularity: GranularityLevel,
    pub points: Vec<SeriesPoint>,
    pub super_labels: Vec<String>,
    pub axis: Option<AxisBounds>,
}

/// Several named series on one shared axis. A series with no valid points
/// is kept as an empty entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonView {
    pub granularity: GranularityLevel,
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
    pub axis: Option<AxisBounds>,
}

#[derive(Clone)]
pub struct HistoricalService {
    source: Arc<dyn HistoricalSource>,
}

impl HistoricalService {
    pub fn new(source: Arc<dyn HistoricalSource>) -> Self {
        Self { source }
    }

    /// Aligns the requested range to the granularity, fetches it and
    /// aggregates the response.
    pub async fn load(&self, query: HistoricalQuery) -> anyhow::Result<HistoricalView> {
        let query = align_query(query);
        let response = self.source.fetch(&query).await?;

        let aggregated = aggregate(&response.groups, query.granularity);
        tracing::debug!(
            "Aggregated {} points into {} labels for {} ({})",
            aggregated.points.len(),
            aggregated.super_labels.len(),
            query.sensor_type,
            query.granularity
        );

        let sensor_type = if response.sensor_type.is_empty() {
            query.sensor_type
        } else {
            response.sensor_type
        };
        let axis = query.granularity.axis_bounds(&aggregated.points);

        Ok(HistoricalView {
            sensor_type,
            granularity: query.granularity,
            points: aggregated.points,
            super_labels: aggregated.super_labels,
            axis,
        })
    }

    /// Fetches every selected series concurrently and normalizes each one
    /// independently. Any failed fetch fails the whole comparison.
    pub async fn load_multiple(&self, query: ComparisonQuery) -> anyhow::Result<ComparisonView> {
        let fetches = query.series.iter().map(|selector| {
            let series_query = align_query(query.series_query(selector));
            async move {
                let response = self
                    .source
                    .fetch(&series_query)
                    .await
                    .with_context(|| format!("Failed to fetch series {}", selector.name))?;
                anyhow::Ok((selector.name.clone(), response))
            }
        });
        let responses = futures::future::try_join_all(fetches).await?;

        // selectors sharing a name are drawn as one line
        let mut per_series: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
        for (name, response) in responses {
            per_series
                .entry(name)
                .or_default()
                .extend(response.groups.into_iter().flat_map(|group| group.readings));
        }

        let series = aggregate_multiple(per_series, query.granularity);
        tracing::debug!(
            "Aggregated {} series at {}",
            series.len(),
            query.granularity
        );

        let mut extremes: Vec<SeriesPoint> = series
            .values()
            .filter_map(|points| points.first().zip(points.last()))
            .flat_map(|(first, last)| [*first, *last])
            .collect();
        extremes.sort_by_key(|point| point.time_ms);
        let axis = query.granularity.axis_bounds(&extremes);

        Ok(ComparisonView {
            granularity: query.granularity,
            series,
            axis,
        })
    }
}

fn align_query(mut query: HistoricalQuery) -> HistoricalQuery {
    let (start, end) = query.granularity.align_range(
        query.start.timestamp_millis(),
        query.end.timestamp_millis(),
    );
    if let (Some(start), Some(end)) = (
        chrono::DateTime::from_timestamp_millis(start),
        chrono::DateTime::from_timestamp_millis(end),
    ) {
        query.start = start;
        query.end = end;
    }
    query
}
