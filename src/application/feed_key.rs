// Live feed identity and request URL construction
use crate::domain::error::StreamError;
use crate::domain::params::{AddressingParams, ControlParams};
use std::fmt;

/// Stable identity of a live feed request. Never carries a cache-buster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey(String);

impl FeedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The effective request the live endpoint reads, resolved from params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    facility: String,
    sensor_box: String,
    sensor: String,
    frequency_ms: Option<u64>,
    aggregation: Option<(String, Option<u64>)>,
}

impl FeedRequest {
    /// Fails with `IncompleteParams` while any addressing field is missing.
    pub fn resolve(
        addressing: &AddressingParams,
        controls: &ControlParams,
    ) -> Result<Self, StreamError> {
        if !addressing.is_complete() {
            return Err(StreamError::IncompleteParams);
        }

        // BLE boxes are served by the radio endpoint
        let sensor = match addressing.sensor.trim() {
            "ble" => "radio".to_string(),
            other => other.to_string(),
        };

        // buffer is only read alongside a metric, falling back to the frequency
        let aggregation = controls
            .aggregation_metric
            .as_ref()
            .filter(|metric| !metric.is_empty())
            .map(|metric| (metric.clone(), controls.buffer_ms.or(controls.frequency_ms)));

        Ok(Self {
            facility: addressing.facility.trim().to_string(),
            sensor_box: addressing.sensor_box.trim().to_string(),
            sensor,
            frequency_ms: controls.frequency_ms,
            aggregation,
        })
    }

    pub fn key(&self) -> FeedKey {
        FeedKey(with_query(self.path(), &self.query(false)))
    }

    /// Full endpoint URL, with `_=<cache_buster>` appended when given.
    pub fn url(&self, base_url: &str, cache_buster: Option<i64>) -> String {
        let mut params = self.query(true);
        if let Some(token) = cache_buster {
            params.push(format!("_={}", token));
        }
        with_query(
            format!("{}/{}", base_url.trim_end_matches('/'), self.path()),
            &params,
        )
    }

    fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            urlencoding::encode(&self.facility),
            urlencoding::encode(&self.sensor_box),
            urlencoding::encode(&self.sensor)
        )
    }

    /// Parameters in a fixed order. The endpoint takes seconds; the key keeps
    /// exact milliseconds so sub-second changes still change identity.
    fn query(&self, wire: bool) -> Vec<String> {
        let duration = |name: &str, ms: u64| {
            if wire {
                format!("{}={}", name, ms.div_ceil(1000))
            } else {
                format!("{}_ms={}", name, ms)
            }
        };

        let mut params = Vec::new();
        if let Some(frequency) = self.frequency_ms {
            params.push(duration("frequency", frequency));
        }
        if let Some((metric, buffer)) = &self.aggregation {
            params.push(format!("aggregation_metric={}", urlencoding::encode(metric)));
            if let Some(buffer) = buffer {
                params.push(duration("buffer_time", *buffer));
            }
        }
        params
    }
}

fn with_query(path: String, params: &[String]) -> String {
    if params.is_empty() {
        path
    } else {
        format!("{}?{}", path, params.join("&"))
    }
}

/// Derives the identity of a feed, or `None` when it cannot connect yet.
pub fn build_key(addressing: &AddressingParams, controls: &ControlParams) -> Option<FeedKey> {
    FeedRequest::resolve(addressing, controls)
        .ok()
        .map(|request| request.key())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addressing(sensor: &str) -> AddressingParams {
        AddressingParams::new("F1", "B1", sensor)
    }

    #[test]
    fn test_key_is_order_independent() {
        let mut first = ControlParams::default();
        first.merge(ControlParams {
            frequency_ms: Some(60_000),
            ..Default::default()
        });
        first.merge(ControlParams {
            aggregation_metric: Some("average".to_string()),
            buffer_ms: Some(120_000),
            ..Default::default()
        });

        let mut second = ControlParams::default();
        second.merge(ControlParams {
            buffer_ms: Some(5_000),
            ..Default::default()
        });
        second.merge(ControlParams {
            aggregation_metric: Some("average".to_string()),
            ..Default::default()
        });
        second.merge(ControlParams {
            buffer_ms: Some(120_000),
            frequency_ms: Some(60_000),
            ..Default::default()
        });

        let key = build_key(&addressing("temperature"), &first).unwrap();
        assert_eq!(key, build_key(&addressing("temperature"), &second).unwrap());
        assert_eq!(
            key.as_str(),
            "F1/B1/temperature?frequency_ms=60000&aggregation_metric=average&buffer_time_ms=120000"
        );
    }

    #[test]
    fn test_key_changes_with_every_read_param() {
        let controls = ControlParams {
            frequency_ms: Some(60_000),
            ..Default::default()
        };
        let base = build_key(&addressing("temperature"), &controls).unwrap();

        assert_ne!(base, build_key(&addressing("humidity"), &controls).unwrap());
        assert_ne!(
            base,
            build_key(
                &addressing("temperature"),
                &ControlParams {
                    frequency_ms: Some(60_500),
                    ..Default::default()
                }
            )
            .unwrap()
        );
        assert_ne!(
            base,
            build_key(
                &addressing("temperature"),
                &ControlParams {
                    frequency_ms: Some(60_000),
                    aggregation_metric: Some("max".to_string()),
                    ..Default::default()
                }
            )
            .unwrap()
        );
    }

    #[test]
    fn test_incomplete_addressing_has_no_key() {
        let controls = ControlParams::default();
        assert!(build_key(&AddressingParams::new("F1", "", "temperature"), &controls).is_none());
        assert!(build_key(&AddressingParams::default(), &controls).is_none());
        assert_eq!(
            FeedRequest::resolve(&AddressingParams::new("F1", "B1", " "), &controls),
            Err(StreamError::IncompleteParams)
        );
    }

    #[test]
    fn test_url_carries_cache_buster_but_key_does_not() {
        let controls = ControlParams {
            frequency_ms: Some(60_000),
            aggregation_metric: Some("sum".to_string()),
            ..Default::default()
        };
        let request = FeedRequest::resolve(&addressing("ble"), &controls).unwrap();

        assert_eq!(
            request.url("http://localhost:8002/monitoring/", Some(1234)),
            "http://localhost:8002/monitoring/F1/B1/radio?frequency=60&aggregation_metric=sum&buffer_time=60&_=1234"
        );
        assert!(!request.key().as_str().contains("_="));
        assert_eq!(request.key(), request.clone().key());
    }

    #[test]
    fn test_path_segments_are_encoded() {
        let request = FeedRequest::resolve(
            &AddressingParams::new("uoa", "box 7/a", "temperature"),
            &ControlParams::default(),
        )
        .unwrap();
        assert_eq!(
            request.url("http://h", None),
            "http://h/uoa/box%207%2Fa/temperature"
        );
    }
}
