//! Blocking fetcher for the remote building-stock release tree.
//!
//! - Plain GETs through `ureq`; no caching, every call is a live round trip.
//! - Transient failures (timeouts, dropped connections, 429 and 5xx) are
//!   retried with exponential backoff plus jitter up to the configured budget.
//! - Decoding of the fetched bytes into frames, model text and the weather
//!   geo-index lives here too so callers deal in typed values.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::models::xstock::{Artifact, DatasetKey, GeoIndex, WeatherRecord};
use crate::utils::decode_text;
use flate2::read::GzDecoder;
use http::StatusCode;
use log::{debug, warn};
use rand::Rng;
use std::io::Read;
use std::num::NonZeroU32;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http status {0}")]
    Status(u16),
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status(code) => StatusCode::from_u16(*code)
                .is_ok_and(|status| status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS),
            TransportError::Transient(_) => true,
            TransportError::Permanent(_) => false,
        }
    }
}

/// Fetch-by-URL seam; swapped for an in-memory map in tests.
pub trait Transport {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, TransportError>;
}

pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        HttpTransport { agent }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, TransportError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::StatusCode(code) => TransportError::Status(code),
            ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed | ureq::Error::Io(_) => {
                TransportError::Transient(e.to_string())
            }
            other => TransportError::Permanent(other.to_string()),
        })?;
        // Stream the body ourselves: release artifacts easily exceed ureq's in-memory read limit.
        let mut body = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| TransportError::Transient(format!("reading body failed: {}", e)))?;
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: NonZeroU32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(500),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
        exp.min(MAX_BACKOFF) + jitter
    }
}

/// Remote locations, normally taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub dataset_root_url: String,
    pub weather_index_url: String,
    pub schedule_url: String,
}

pub struct DatasetFetcher {
    transport: Box<dyn Transport>,
    endpoints: Endpoints,
    retry: RetryPolicy,
}

impl DatasetFetcher {
    pub fn new(transport: Box<dyn Transport>, endpoints: Endpoints, retry: RetryPolicy) -> Self {
        DatasetFetcher {
            transport,
            endpoints,
            retry,
        }
    }

    pub fn url(&self, key: &DatasetKey, artifact: &Artifact) -> String {
        match artifact.relative_path() {
            Some(path) => format!(
                "{}/{}/{}",
                self.endpoints.dataset_root_url.trim_end_matches('/'),
                key.url_segment(),
                path
            ),
            None if *artifact == Artifact::WeatherIndex => self.endpoints.weather_index_url.clone(),
            None => self.endpoints.schedule_url.clone(),
        }
    }

    /// Raw bytes of one artifact.
    pub fn fetch(&self, key: &DatasetKey, artifact: &Artifact) -> Result<Vec<u8>> {
        self.fetch_url(&self.url(key, artifact))
    }

    pub fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let max_attempts = self.retry.max_attempts.get();
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("GET {} (attempt {}/{})", url, attempt, max_attempts);
            match self.transport.get(url) {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!("GET {} failed ({}); retrying in {:?}", url, e, delay);
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    return Err(Error::Fetch {
                        url: url.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Tabular artifact decoded by its path extension.
    pub fn fetch_frame(&self, key: &DatasetKey, artifact: &Artifact) -> Result<Frame> {
        let url = self.url(key, artifact);
        let body = self.fetch_url(&url)?;
        Frame::from_artifact(&url, body)
    }

    /// Building model text; gzip is detected by magic bytes so plain models also pass.
    pub fn fetch_model(&self, key: &DatasetKey, bldg_id: i64, upgrade: i64) -> Result<String> {
        let artifact = Artifact::Model { bldg_id, upgrade };
        let body = self.fetch(key, &artifact)?;
        if body.starts_with(&[0x1f, 0x8b]) {
            let mut text = String::new();
            GzDecoder::new(body.as_slice())
                .read_to_string(&mut text)
                .map_err(|e| Error::decode(artifact.to_string(), e))?;
            Ok(text)
        } else {
            String::from_utf8(body).map_err(|e| Error::decode(artifact.to_string(), e))
        }
    }

    /// Stations of the geo-index published by `provider`.
    pub fn fetch_weather_index(&self, provider: &str) -> Result<Vec<WeatherRecord>> {
        let body = self.fetch_url(&self.endpoints.weather_index_url)?;
        let de = &mut serde_json::Deserializer::from_slice(&body);
        let index: GeoIndex = serde_path_to_error::deserialize(de)
            .map_err(|e| Error::decode(Artifact::WeatherIndex.to_string(), format!("at {}: {}", e.path(), e.inner())))?;
        Ok(index.records(provider))
    }

    /// Text document (EPW/DDY) with the Windows-1252 fallback.
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self.fetch_url(url)?;
        Ok(decode_text(&body).into_owned())
    }

    pub fn fetch_schedule(&self) -> Result<Frame> {
        let body = self.fetch_url(&self.endpoints.schedule_url)?;
        Frame::from_delimited(&self.endpoints.schedule_url, &body, b',')
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn key() -> DatasetKey {
        DatasetKey::new("resstock", "tmy3", 2021, 1)
    }

    #[test]
    fn builds_artifact_urls() {
        let fetcher = fetcher(MemoryTransport::default());
        assert_eq!(
            fetcher.url(&key(), &Artifact::Metadata),
            "https://data.test/root/2021/resstock_tmy3_release_1/metadata/metadata.parquet"
        );
        assert_eq!(fetcher.url(&key(), &Artifact::WeatherIndex), "https://data.test/master.geojson");
        assert_eq!(fetcher.url(&key(), &Artifact::Schedule), "https://data.test/8760.csv");
    }

    #[test]
    fn retries_transient_failures_within_budget() {
        let url = "https://data.test/8760.csv";
        let mut transport = MemoryTransport::default();
        transport.insert(url, "a,b\n1,2\n");
        transport.fail_times(url, 2);
        let frame = fetcher(transport).fetch_schedule().unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn surfaces_final_failure_with_attempt_count() {
        let url = "https://data.test/8760.csv";
        let mut transport = MemoryTransport::default();
        transport.insert(url, "a\n1\n");
        transport.fail_times(url, 5);
        match fetcher(transport).fetch_url(url) {
            Err(Error::Fetch { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn does_not_retry_not_found() {
        match fetcher(MemoryTransport::default()).fetch_url("https://data.test/missing") {
            Err(Error::Fetch { attempts, message, .. }) => {
                assert_eq!(attempts, 1);
                assert!(message.contains("404"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decompresses_models() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"OS:Version,\n  {uid}, 3.2.1;\n").unwrap();
        let gz = encoder.finish().unwrap();

        let mut transport = MemoryTransport::default();
        transport.insert(
            "https://data.test/root/2021/resstock_tmy3_release_1/building_energy_models/bldg0000100-up00.osm.gz",
            gz,
        );
        let osm = fetcher(transport).fetch_model(&key(), 100, 0).unwrap();
        assert!(osm.starts_with("OS:Version"));
    }

    #[test]
    fn reports_geo_index_decode_path() {
        let mut transport = MemoryTransport::default();
        transport.insert("https://data.test/master.geojson", r#"{"features": [{"geometry": {"coordinates": "x"}}]}"#);
        let err = fetcher(transport).fetch_weather_index("TMY3").unwrap_err();
        assert!(err.to_string().contains("features[0]"), "{err}");
    }
}
