// Historical processing client - HTTP adapter for grouped sensor history
use crate::application::aggregator::ReadingGroup;
use crate::application::historical_source::{GroupedResponse, HistoricalQuery, HistoricalSource};
use crate::domain::reading::Reading;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpHistoricalSource {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    facility: &'a str,
    sensor_type: &'a str,
    aggregation_level: &'a str,
    agent_serial: &'a [String],
    metric: &'a str,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    sensor_type: Option<String>,
    #[serde(default)]
    aggregated_results: serde_json::Map<String, serde_json::Value>,
}

impl HttpHistoricalSource {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build historical HTTP client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl HistoricalSource for HttpHistoricalSource {
    async fn fetch(&self, query: &HistoricalQuery) -> Result<GroupedResponse> {
        let body = ProcessRequest {
            facility: &query.facility,
            sensor_type: &query.sensor_type,
            aggregation_level: query.granularity.backend_name(),
            agent_serial: &query.agent_serials,
            metric: &query.metric,
            start: query.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            end: query.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
        };

        tracing::debug!("Fetching history {:?}", body);
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to historical service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Historical query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<ProcessResponse>()
            .await
            .context("Failed to parse historical response")?;

        Ok(into_grouped(data))
    }
}

/// Keeps group order as sent; points that are not valid readings are skipped.
fn into_grouped(data: ProcessResponse) -> GroupedResponse {
    let mut skipped = 0;
    let groups = data
        .aggregated_results
        .into_iter()
        .map(|(name, points)| {
            let points = match points {
                serde_json::Value::Array(points) => points,
                _ => Vec::new(),
            };
            let readings = points
                .into_iter()
                .filter_map(|point| match Reading::from_value(point) {
                    Ok(reading) => Some(reading),
                    Err(_) => {
                        skipped += 1;
                        None
                    }
                })
                .collect();
            ReadingGroup::new(name, readings)
        })
        .collect();

    if skipped > 0 {
        tracing::debug!("Skipped {} invalid historical points", skipped);
    }

    GroupedResponse {
        sensor_type: data.sensor_type.unwrap_or_default(),
        groups,
    }
}
