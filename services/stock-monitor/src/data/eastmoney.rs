//! Eastmoney adapter for A-share end-of-day data.
//!
//! Implements [`MarketDataProvider`] over the public eastmoney endpoints.
//! No API key required.
//!
//! # Data Sources
//! - Full-market cross-section: `clist/get` on push2.eastmoney.com
//! - Trading dates: daily k-lines of the Shanghai Composite (`1.000001`) on
//!   push2his.eastmoney.com; every bar date is a trading date

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{MarketDataProvider, ProviderError};
use super::{RawRecord, DATE_FORMAT};
use monitor_common::ProviderConfig;

// ============================================================================
// Constants
// ============================================================================

/// Public token used by the eastmoney web quote pages
const EASTMONEY_UT: &str = "bd1d9ddb04089700cf9c27f6f7426281";

/// Market filter: SZ main board, SZ ChiNext, SH main board, SH STAR, BJ
const A_SHARE_MARKETS: &str = "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23,m:0 t:81 s:2048";

/// Daily bars
const KLT_DAILY: &str = "101";

/// Upper bound on cross-section pages (the server caps page size)
const MAX_CLIST_PAGES: u32 = 200;

/// Eastmoney field code → localized column name
const CLIST_FIELDS: &[(&str, &str)] = &[
    ("f12", "代码"),
    ("f14", "名称"),
    ("f2", "最新价"),
    ("f3", "涨跌幅"),
    ("f4", "涨跌额"),
    ("f5", "成交量"),
    ("f6", "成交额"),
    ("f7", "振幅"),
    ("f15", "最高"),
    ("f16", "最低"),
    ("f17", "今开"),
    ("f18", "昨收"),
    ("f8", "换手率"),
    ("f9", "市盈率-动态"),
    ("f23", "市净率"),
    ("f20", "总市值"),
    ("f21", "流通市值"),
    ("f22", "涨速"),
    ("f11", "5分钟涨跌"),
    ("f24", "60日涨跌幅"),
    ("f25", "年初至今涨跌幅"),
];

// ============================================================================
// Eastmoney Adapter
// ============================================================================

/// Eastmoney market data provider.
pub struct EastmoneyAdapter {
    client: reqwest::Client,
    clist_url: String,
    kline_url: String,
    calendar_secid: String,
    page_size: u32,
}

impl EastmoneyAdapter {
    /// Create from the provider configuration section
    pub fn from_config(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            clist_url: config.clist_url.clone(),
            kline_url: config.kline_url.clone(),
            calendar_secid: config.calendar_secid.clone(),
            page_size: config.page_size,
        }
    }

    /// Create with default endpoints
    pub fn new() -> Self {
        Self::from_config(&ProviderConfig::default())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        debug!(url = %url, "Fetching from eastmoney");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {}", e)))
    }
}

impl Default for EastmoneyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rename `fNN` keys to localized column names, dropping the rest.
fn localize_record(item: &serde_json::Map<String, Value>) -> RawRecord {
    CLIST_FIELDS
        .iter()
        .filter_map(|(code, column)| item.get(*code).map(|v| (column.to_string(), v.clone())))
        .collect()
}

/// Date prefix of a k-line row ("2024-01-05,2950.1,...").
fn kline_date(line: &str) -> Option<NaiveDate> {
    let date = line.split(',').next()?;
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()
}

#[async_trait]
impl MarketDataProvider for EastmoneyAdapter {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn get_current_trading_dates(&self) -> Result<BTreeSet<NaiveDate>, ProviderError> {
        let query = [
            ("secid", self.calendar_secid.clone()),
            ("klt", KLT_DAILY.to_string()),
            ("fqt", "0".to_string()),
            ("beg", "0".to_string()),
            ("end", "20500101".to_string()),
            ("fields1", "f1,f2,f3".to_string()),
            ("fields2", "f51".to_string()),
            ("ut", EASTMONEY_UT.to_string()),
        ];

        let data: EastmoneyKlineResponse = self.get_json(&self.kline_url, &query).await?;
        if data.rc != 0 {
            return Err(ProviderError::Malformed(format!("Eastmoney API error: rc={}", data.rc)));
        }

        let klines = data.data.and_then(|d| d.klines).unwrap_or_default();
        let mut dates = BTreeSet::new();
        for line in &klines {
            match kline_date(line) {
                Some(date) => {
                    dates.insert(date);
                }
                None => warn!(line = %line, "Skipping unparseable kline row"),
            }
        }

        debug!(dates = dates.len(), secid = %self.calendar_secid, "Fetched trading dates");
        Ok(dates)
    }

    async fn get_latest_cross_section(&self) -> Result<Vec<RawRecord>, ProviderError> {
        let mut records: Vec<RawRecord> = Vec::new();
        let mut page = 1;

        loop {
            let Some(payload) = self.fetch_clist_page(page).await? else {
                if page == 1 {
                    return Ok(Vec::new());
                }
                return Err(incomplete_section(records.len(), None));
            };

            let received = payload.diff.len();
            records.extend(payload.diff.iter().map(localize_record));
            let expected = payload.total.unwrap_or(records.len() as u64);

            if records.len() as u64 >= expected {
                break;
            }
            if received == 0 || page >= MAX_CLIST_PAGES {
                return Err(incomplete_section(records.len(), Some(expected)));
            }
            page += 1;
        }

        debug!(rows = records.len(), pages = page, "Fetched cross-section");
        Ok(records)
    }
}

impl EastmoneyAdapter {
    async fn fetch_clist_page(&self, page: u32) -> Result<Option<EastmoneyClistData>, ProviderError> {
        let fields = CLIST_FIELDS
            .iter()
            .map(|(code, _)| *code)
            .collect::<Vec<_>>()
            .join(",");

        // Sorted by code so pages stay stable while quotes move
        let query = [
            ("pn", page.to_string()),
            ("pz", self.page_size.to_string()),
            ("po", "0".to_string()),
            ("np", "1".to_string()),
            ("ut", EASTMONEY_UT.to_string()),
            ("fltt", "2".to_string()),
            ("invt", "2".to_string()),
            ("fid", "f12".to_string()),
            ("fs", A_SHARE_MARKETS.to_string()),
            ("fields", fields),
        ];

        let data: EastmoneyClistResponse = self.get_json(&self.clist_url, &query).await?;
        if data.rc != 0 {
            return Err(ProviderError::Malformed(format!("Eastmoney API error: rc={}", data.rc)));
        }
        Ok(data.data)
    }
}

/// A partial list is never returned; storage is write-once per date.
fn incomplete_section(received: usize, expected: Option<u64>) -> ProviderError {
    let expected = expected.map_or_else(|| "?".to_string(), |n| n.to_string());
    warn!(received, expected = %expected, "Cross-section incomplete, discarding");
    ProviderError::Malformed(format!(
        "Cross-section incomplete: received {} of {} rows",
        received, expected
    ))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct EastmoneyKlineResponse {
    rc: i32,
    data: Option<EastmoneyKlineData>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyKlineData {
    klines: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyClistResponse {
    rc: i32,
    data: Option<EastmoneyClistData>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyClistData {
    total: Option<u64>,
    #[serde(default)]
    diff: Vec<serde_json::Map<String, Value>>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> EastmoneyAdapter {
        let config = ProviderConfig {
            timeout_secs: 5,
            clist_url: format!("{}/api/qt/clist/get", server.uri()),
            kline_url: format!("{}/api/qt/stock/kline/get", server.uri()),
            ..Default::default()
        };
        EastmoneyAdapter::from_config(&config)
    }

    #[test]
    fn test_kline_date() {
        assert_eq!(
            kline_date("2024-01-05,2950.1,2929.2"),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(kline_date("garbage"), None);
    }

    #[test]
    fn test_localize_record() {
        let item = json!({ "f12": "600519", "f14": "贵州茅台", "f2": 1700.5, "f1": 2, "f13": 1 });
        let record = localize_record(item.as_object().unwrap());
        assert_eq!(record.len(), 3);
        assert_eq!(record["代码"], "600519");
        assert_eq!(record["最新价"], 1700.5);
    }

    #[tokio::test]
    async fn test_trading_dates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/kline/get"))
            .and(query_param("secid", "1.000001"))
            .and(query_param("klt", "101"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "code": "000001", "klines": [
                    "2024-01-02", "2024-01-03", "2024-01-04", "not-a-date"
                ] }
            })))
            .mount(&server)
            .await;

        let dates = adapter_for(&server).get_current_trading_dates().await.unwrap();
        assert_eq!(dates.len(), 3);
        assert_eq!(dates.iter().next_back(), NaiveDate::from_ymd_opt(2024, 1, 4).as_ref());
    }

    #[tokio::test]
    async fn test_cross_section() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "total": 2, "diff": [
                    { "f12": "600519", "f14": "贵州茅台", "f2": 1700.5, "f8": 0.28 },
                    { "f12": "000001", "f14": "平安银行", "f2": "-", "f8": "-" }
                ] }
            })))
            .mount(&server)
            .await;

        let records = adapter_for(&server).get_latest_cross_section().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["名称"], "贵州茅台");
        assert_eq!(records[1]["换手率"], "-");
    }

    #[tokio::test]
    async fn test_null_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rc": 0, "data": null })))
            .mount(&server)
            .await;

        let records = adapter_for(&server).get_latest_cross_section().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_cross_section_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .and(query_param("pn", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "total": 3, "diff": [
                    { "f12": "000001", "f14": "平安银行", "f2": 9.5 },
                    { "f12": "000002", "f14": "万科A", "f2": 7.1 }
                ] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "total": 3, "diff": [
                    { "f12": "600519", "f14": "贵州茅台", "f2": 1700.5 }
                ] }
            })))
            .mount(&server)
            .await;

        let records = adapter_for(&server).get_latest_cross_section().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["代码"], "600519");
    }

    #[tokio::test]
    async fn test_truncated_cross_section_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .and(query_param("pn", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "total": 5000, "diff": [
                    { "f12": "000001", "f14": "平安银行", "f2": 9.5 },
                    { "f12": "000002", "f14": "万科A", "f2": 7.1 }
                ] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/qt/clist/get"))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rc": 0,
                "data": { "total": 5000, "diff": [] }
            })))
            .mount(&server)
            .await;

        let err = adapter_for(&server).get_latest_cross_section().await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(msg) if msg.contains("2 of 5000")));
    }

    #[tokio::test]
    async fn test_error_code_maps_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/qt/stock/kline/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rc": 102, "data": null })))
            .mount(&server)
            .await;

        let err = adapter_for(&server).get_current_trading_dates().await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_http_error_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter_for(&server).get_latest_cross_section().await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_invalid_body_maps_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
            .mount(&server)
            .await;

        let err = adapter_for(&server).get_latest_cross_section().await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
