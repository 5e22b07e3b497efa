//! ClickHouse HTTP source
//!
//! Sends dataset SQL to the ClickHouse HTTP interface and parses the
//! `JSONEachRow` response. One query serves every metric column of a
//! dataset: the parsed frame is cached for a short TTL so a cycle that
//! evaluates several metrics of the same dataset queries it once.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::{Dataset, SeriesFrame, SeriesProvider, SourceError};
use crate::models::MetricSeries;

/// Connection settings for the ClickHouse HTTP interface
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. "http://clickhouse:8123"
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Request timeout
    pub timeout: StdDuration,
    /// How long a fetched dataset frame is reused
    pub cache_ttl: StdDuration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: None,
            timeout: StdDuration::from_secs(30),
            cache_ttl: StdDuration::from_secs(60),
        }
    }
}

/// Shared HTTP client for one ClickHouse server
pub struct ClickHouseClient {
    http: Client,
    base_url: Url,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    pub fn new(config: ClickHouseConfig) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let base_url = Url::parse(&config.url)?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Run a query and parse its rows
    pub async fn query(&self, dataset: &str, sql: String) -> Result<SeriesFrame, SourceError> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("database", &self.config.database)
            .append_pair("default_format", "JSONEachRow");

        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.user, self.config.password.as_deref())
            .body(sql)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let body = response.text().await?;
        let frame = SeriesFrame::parse_json_each_row(dataset, &body)?;

        debug!(
            dataset = %dataset,
            rows = frame.rows().len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Fetched dataset from ClickHouse"
        );

        Ok(frame)
    }
}

struct CachedFrame {
    fetched_at: Instant,
    lookback_days: i64,
    frame: Arc<SeriesFrame>,
}

/// Series provider backed by one ClickHouse dataset query
pub struct ClickHouseSource {
    client: Arc<ClickHouseClient>,
    dataset: Dataset,
    cache_ttl: StdDuration,
    cache: Mutex<Option<CachedFrame>>,
}

impl ClickHouseSource {
    pub fn new(client: Arc<ClickHouseClient>, dataset: Dataset) -> Self {
        let cache_ttl = client.config().cache_ttl;
        Self {
            client,
            dataset,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    async fn frame(&self, lookback: Duration) -> Result<Arc<SeriesFrame>, SourceError> {
        let lookback_days = lookback.num_days().max(1);
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.lookback_days == lookback_days && cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.frame.clone());
            }
        }

        let frame = Arc::new(
            self.client
                .query(&self.dataset.name, self.dataset.render(lookback))
                .await?,
        );

        *cache = Some(CachedFrame {
            fetched_at: Instant::now(),
            lookback_days,
            frame: frame.clone(),
        });

        Ok(frame)
    }
}

#[async_trait]
impl SeriesProvider for ClickHouseSource {
    async fn fetch_series(&self, metric: &str, lookback: Duration) -> Result<MetricSeries, SourceError> {
        self.frame(lookback).await?.series(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const BODY: &str = "{\"ts\":\"2025-07-11 12:00:00\",\"views_per_user\":10,\"CTR\":0.2}\n\
                        {\"ts\":\"2025-07-18 12:00:00\",\"views_per_user\":14,\"CTR\":0.21}\n";

    fn config(url: String, cache_ttl: StdDuration) -> ClickHouseConfig {
        ClickHouseConfig {
            url,
            database: "analytics".to_string(),
            user: "reader".to_string(),
            password: Some("secret".to_string()),
            timeout: StdDuration::from_secs(5),
            cache_ttl,
        }
    }

    #[tokio::test]
    async fn test_fetch_series_queries_dataset_once_per_ttl() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("database".into(), "analytics".into()),
                Matcher::UrlEncoded("default_format".into(), "JSONEachRow".into()),
            ]))
            .match_body(Matcher::Regex("today\\(\\) - 14".to_string()))
            .with_status(200)
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let client = Arc::new(
            ClickHouseClient::new(config(server.url(), StdDuration::from_secs(60))).unwrap(),
        );
        let source = ClickHouseSource::new(
            client,
            Dataset::new("feed", "SELECT * FROM t WHERE time >= today() - {lookback_days}"),
        );

        let views = source
            .fetch_series("views_per_user", Duration::days(14))
            .await
            .unwrap();
        let ctr = source.fetch_series("CTR", Duration::days(14)).await.unwrap();

        assert_eq!(views.latest().value, 14.0);
        assert_eq!(ctr.observations().len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_ttl_refetches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(BODY)
            .expect(2)
            .create_async()
            .await;

        let client =
            Arc::new(ClickHouseClient::new(config(server.url(), StdDuration::ZERO)).unwrap());
        let source = ClickHouseSource::new(client, Dataset::new("feed", "SELECT 1"));

        source.fetch_series("CTR", Duration::days(14)).await.unwrap();
        source.fetch_series("CTR", Duration::days(14)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("Code: 60. DB::Exception: Table does not exist")
            .create_async()
            .await;

        let client = Arc::new(
            ClickHouseClient::new(config(server.url(), StdDuration::from_secs(60))).unwrap(),
        );
        let source = ClickHouseSource::new(client, Dataset::new("feed", "SELECT 1"));

        let err = source
            .fetch_series("CTR", Duration::days(14))
            .await
            .unwrap_err();
        match err {
            SourceError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("Table does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = ClickHouseClient::new(config("not a url".to_string(), StdDuration::ZERO));
        assert!(matches!(result, Err(SourceError::InvalidUrl(_))));
    }
}
