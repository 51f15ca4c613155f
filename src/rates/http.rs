//! Implements `RateProvider` over HTTP using `reqwest`.

use crate::rates::{RateProvider, RateTable};
use crate::Result;
use anyhow::{bail, Context};
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

/// Fetches the historical series and the current official rate from two JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    client: reqwest::Client,
    historical_url: String,
    current_url: String,
    access_key_header: String,
    access_key: Option<String>,
}

impl HttpRateProvider {
    /// `timeout` bounds each request; the access key, when present, is sent to the historical
    /// endpoint in the `access_key_header` header.
    pub fn new(
        historical_url: impl Into<String>,
        current_url: impl Into<String>,
        access_key_header: impl Into<String>,
        access_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Unable to build the HTTP client")?;
        Ok(Self {
            client,
            historical_url: historical_url.into(),
            current_url: current_url.into(),
            access_key_header: access_key_header.into(),
            access_key,
        })
    }

    async fn get_text(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Unable to reach the {what} endpoint"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("The {what} endpoint answered with status {status}");
        }
        response
            .text()
            .await
            .with_context(|| format!("Unable to read the {what} response body"))
    }
}

#[async_trait::async_trait]
impl RateProvider for HttpRateProvider {
    async fn historical(&self) -> Result<RateTable> {
        trace!("GET {}", self.historical_url);
        let mut request = self.client.get(&self.historical_url);
        if let Some(key) = &self.access_key {
            request = request.header(self.access_key_header.as_str(), key.as_str());
        }
        let body = self.get_text(request, "historical rate").await?;
        let table = parse_historical(&body)?;
        debug!("Fetched {} historical rates", table.len());
        Ok(table)
    }

    async fn current(&self) -> Result<Decimal> {
        trace!("GET {}", self.current_url);
        let request = self.client.get(&self.current_url);
        let body = self.get_text(request, "current rate").await?;
        parse_current(&body)
    }
}

/// The historical endpoint answers either `{"rates": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoricalPayload {
    Wrapped { rates: Vec<RateEntry> },
    Bare(Vec<RateEntry>),
}

#[derive(Debug, Deserialize)]
struct RateEntry {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    usd: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CurrentPayload {
    promedio: f64,
}

/// Decodes a historical payload. Entries without a usable date or a positive rate are skipped;
/// dates are truncated to day precision (`2024-03-08T00:00:00Z` -> `2024-03-08`).
pub(crate) fn parse_historical(body: &str) -> Result<RateTable> {
    let payload: HistoricalPayload =
        serde_json::from_str(body).context("Unable to parse the historical rate payload")?;
    let entries = match payload {
        HistoricalPayload::Wrapped { rates } => rates,
        HistoricalPayload::Bare(rates) => rates,
    };

    let mut table = RateTable::new();
    for entry in entries {
        let Some(date) = entry.date.as_deref().and_then(day_of) else {
            continue;
        };
        let Some(rate) = entry.usd.as_ref().and_then(decimal_of) else {
            continue;
        };
        table.insert(date, rate);
    }
    Ok(table)
}

/// Decodes `{"promedio": number}`.
pub(crate) fn parse_current(body: &str) -> Result<Decimal> {
    let payload: CurrentPayload =
        serde_json::from_str(body).context("Unable to parse the current rate payload")?;
    Decimal::from_f64(payload.promedio).context("The current rate is not a finite number")
}

fn day_of(text: &str) -> Option<NaiveDate> {
    let day = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn decimal_of(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_historical_wrapped() {
        let body = r#"{"rates": [
            {"date": "2024-03-08T00:00:00.000Z", "usd": 36.5},
            {"date": "2024-03-07", "usd": "36.31"}
        ]}"#;
        let table = parse_historical(body).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(date("2024-03-08")), Decimal::from_str("36.5").ok());
        assert_eq!(table.get(date("2024-03-07")), Decimal::from_str("36.31").ok());
    }

    #[test]
    fn test_parse_historical_bare_array_skips_bad_entries() {
        let body = r#"[
            {"date": "2024-03-08", "usd": 36.5},
            {"date": "2024-03-09"},
            {"usd": 36.9},
            {"date": "not a date", "usd": 36.9},
            {"date": "2024-03-10", "usd": 0},
            {"date": "2024-03-11", "usd": null}
        ]"#;
        let table = parse_historical(body).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(date("2024-03-08")).is_some());
    }

    #[test]
    fn test_parse_historical_rejects_garbage() {
        assert!(parse_historical("<html>").is_err());
        assert!(parse_historical(r#"{"error": "bad key"}"#).is_err());
    }

    #[test]
    fn test_parse_current() {
        let rate = parse_current(r#"{"fuente": "oficial", "promedio": 36.62}"#).unwrap();
        assert_eq!(rate, Decimal::from_str("36.62").unwrap());
        assert!(parse_current(r#"{"precio": 1}"#).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let provider = HttpRateProvider::new(
            "http://127.0.0.1:9/list",
            "http://127.0.0.1:9/oficial",
            "x-access-key",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(provider.historical().await.is_err());
        assert!(provider.current().await.is_err());
    }
}
