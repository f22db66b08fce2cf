//! REST candle history, used to seed a series before live trades arrive.
//!
//! `GET /products/{id}/candles?granularity=&start=&end=` answers with rows
//! `[time, low, high, open, close, volume]`, newest first. Rows are returned
//! here ascending by time.

use anyhow::{Context, Result};
use cbx_core::types::{Candle, Granularity};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::signer::Signer;

/// Candle history client.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
    signer: Signer,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, signer: Signer) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cbx/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, signer })
    }

    /// Fetch candles for `product_id` in `[start, end]`.
    ///
    /// Requests carry `CB-ACCESS-*` headers when an API key is configured.
    pub async fn fetch_candles(
        &self,
        product_id: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let path = candles_path(product_id, granularity, start, end);
        let url = format!("{}{}", self.base_url, path);

        let mut req = self.http.get(&url).header("Accept", "application/json");
        let credential = self.signer.credential();
        if credential.has_api_key() {
            let signed = self.signer.sign(&path, "GET", None);
            req = req
                .header("CB-ACCESS-KEY", credential.api_key.as_deref().unwrap_or_default())
                .header("CB-ACCESS-SIGN", signed.signature)
                .header("CB-ACCESS-TIMESTAMP", signed.timestamp.to_string())
                .header("CB-ACCESS-PASSPHRASE", credential.passphrase.as_deref().unwrap_or_default());
        }

        debug!("[history] GET {}", url);
        let rows: Vec<[f64; 6]> = req
            .send()
            .await
            .with_context(|| format!("candle history request for {product_id} failed"))?
            .error_for_status()
            .with_context(|| format!("candle history HTTP error for {product_id}"))?
            .json()
            .await
            .with_context(|| format!("decoding candle history for {product_id}"))?;

        let candles = rows_to_candles(rows);
        info!("[history] {} {}: {} candles", product_id, granularity, candles.len());
        Ok(candles)
    }

    /// Fetch the default look-back window for `granularity`, ending at `now`.
    pub async fn fetch_seed(
        &self,
        product_id: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let (start, end) = seed_window(granularity, now);
        self.fetch_candles(product_id, granularity, start, end).await
    }
}

/// `(start, end)` covering the granularity's default look-back.
pub fn seed_window(granularity: Granularity, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let lookback = chrono::Duration::from_std(granularity.seed_lookback()).unwrap_or(chrono::Duration::zero());
    (now - lookback, now)
}

/// Request path including the query string; this is also what gets signed.
pub fn candles_path(product_id: &str, granularity: Granularity, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let query = encode_query(&[
        ("granularity", granularity.as_secs().to_string()),
        ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
    ]);
    format!("/products/{}/candles?{}", urlencoding::encode(product_id), query)
}

/// `name=value` pairs joined by `&`, values percent-encoded.
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn rows_to_candles(rows: Vec<[f64; 6]>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows.into_iter().map(Candle::from_rest_row).collect();
    candles.sort_by_key(|c| c.time);
    candles
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn query_encodes_values() {
        let q = encode_query(&[("a", "1".into()), ("start", "2023-01-01T00:00:00Z".into())]);
        assert_eq!(q, "a=1&start=2023-01-01T00%3A00%3A00Z");
    }

    #[test]
    fn path_carries_granularity_and_window() {
        let path = candles_path("BTC-USD", Granularity::M5, at(1_672_531_200), at(1_672_617_600));
        assert_eq!(
            path,
            "/products/BTC-USD/candles?granularity=300\
             &start=2023-01-01T00%3A00%3A00Z&end=2023-01-02T00%3A00%3A00Z"
        );
    }

    #[test]
    fn seed_window_uses_lookback() {
        let now = at(1_700_000_000);
        let (start, end) = seed_window(Granularity::M1, now);
        assert_eq!(end, now);
        assert_eq!((end - start).num_hours(), 5);
        let (start, _) = seed_window(Granularity::D1, now);
        assert_eq!((now - start).num_days(), 300);
    }

    #[test]
    fn rows_come_back_ascending() {
        let rows = vec![
            [120.0, 9.0, 11.0, 10.0, 10.5, 3.0],
            [60.0, 8.0, 10.0, 9.0, 9.5, 2.0],
            [0.0, 7.0, 9.0, 8.0, 8.5, 1.0],
        ];
        let candles = rows_to_candles(rows);
        let times: Vec<i64> = candles.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0, 60, 120]);
        assert_eq!(candles[1].open, 9.0);
        assert_eq!(candles[1].low, 8.0);
        assert_eq!(candles[1].volume, 2.0);
    }
}
