// Historical data source trait - batch fetches that bypass the live pool
use crate::application::aggregator::ReadingGroup;
use crate::domain::granularity::GranularityLevel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalQuery {
    pub facility: String,
    pub sensor_type: String,
    pub granularity: GranularityLevel,
    #[serde(default)]
    pub agent_serials: Vec<String>,
    pub metric: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A grouped response: one group per super-granularity bucket, or a single
/// `all` group when the backend did not segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedResponse {
    pub sensor_type: String,
    pub groups: Vec<ReadingGroup>,
}

#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch(&self, query: &HistoricalQuery) -> anyhow::Result<GroupedResponse>;
}

/// One line of a comparison chart: a sensor type read from a set of boxes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSelector {
    pub name: String,
    pub sensor_type: String,
    #[serde(default)]
    pub agent_serials: Vec<String>,
}

/// Several series over one shared range and granularity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonQuery {
    pub facility: String,
    pub granularity: GranularityLevel,
    pub metric: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub series: Vec<SeriesSelector>,
}

impl ComparisonQuery {
    pub fn series_query(&self, selector: &SeriesSelector) -> HistoricalQuery {
        HistoricalQuery {
            facility: self.facility.clone(),
            sensor_type: selector.sensor_type.clone(),
            granularity: self.granularity,
            agent_serials: selector.agent_serials.clone(),
            metric: self.metric.clone(),
            start: self.start,
            end: self.end,
        }
    }
}
