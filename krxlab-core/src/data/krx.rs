//! KRX marketdata sources.
//!
//! Every KRX screen uses the same two-step flow: request a one-time password
//! (OTP) describing the query, then exchange it for the payload. Masters come
//! back as JSON, daily prices and investor trends as CSV downloads.
//!
//! The endpoints are undocumented and change shape without notice; parsing
//! fails fast with `ResponseFormatChanged` instead of guessing.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, FetchContext, RemoteSource, SyncUnit};
use crate::calendar::start_of_day;
use crate::domain::{normalize_short_code, DailyPrice, Flow, Investor, InvestorTrend, StockMaster};
use crate::record::RecordSet;

const OTP_PATH: &str = "/contents/COM/GenerateOTP.jspx";
const FINDER_PATH: &str = "/contents/MKD/99/MKD99000001.jspx";
const DOWNLOAD_PATH: &str = "/download.jspx";

/// Number of columns in the all-market daily price download.
pub const DAILY_PRICE_COLUMNS: usize = 15;

/// Endpoint and timeout settings.
#[derive(Debug, Clone)]
pub struct KrxConfig {
    pub base_url: String,
    pub file_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for KrxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://marketdata.krx.co.kr".into(),
            file_url: "http://file.krx.co.kr".into(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

// ── HTTP client ─────────────────────────────────────────────────────

/// Blocking client shared by the three KRX sources.
pub struct KrxClient {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    config: KrxConfig,
    base_delay: Duration,
}

impl KrxClient {
    pub fn new(config: KrxConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            config,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }

    /// Step one: describe the query, receive an OTP.
    fn generate_otp(&self, params: &[(&str, String)]) -> Result<String, DataError> {
        let url = format!("{}{OTP_PATH}", self.config.base_url);
        let otp = self.execute("otp", || self.client.get(&url).query(params))?;
        let otp = otp.trim().to_string();
        if otp.is_empty() {
            return Err(DataError::ResponseFormatChanged("empty OTP".into()));
        }
        Ok(otp)
    }

    /// POST a finder form and return the JSON body.
    fn finder(&self, form: &[(&str, String)]) -> Result<String, DataError> {
        let url = format!("{}{FINDER_PATH}", self.config.base_url);
        self.execute("finder", || self.client.post(&url).form(form))
    }

    /// Step two for file downloads.
    fn download(&self, otp: &str) -> Result<String, DataError> {
        let url = format!("{}{DOWNLOAD_PATH}", self.config.file_url);
        let form = [("code", otp.to_string())];
        self.execute("download", || self.client.post(&url).form(&form))
    }

    /// Send a request with retry, backoff and circuit breaker bookkeeping.
    fn execute<F>(&self, what: &str, build: F) -> Result<String, DataError>
    where
        F: Fn() -> reqwest::blocking::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match build().send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} on {what}")));
                        continue;
                    }

                    let body = resp
                        .text()
                        .map_err(|e| DataError::ResponseFormatChanged(format!("{what}: {e}")))?;
                    self.circuit_breaker.record_success();
                    return Ok(body);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other(format!("max retries exceeded on {what}"))))
    }
}

// ── Instrument master ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListedResponse {
    block1: Vec<ListedItem>,
}

#[derive(Debug, Deserialize)]
struct ListedItem {
    full_code: String,
    short_code: String,
    #[serde(rename = "codeName")]
    code_name: String,
    #[serde(rename = "marketName")]
    market_name: String,
}

#[derive(Debug, Deserialize)]
struct DelistedResponse {
    result: Vec<DelistedItem>,
}

#[derive(Debug, Deserialize)]
struct DelistedItem {
    isu_cd: String,
    shrt_isu_cd: String,
    isu_nm: String,
    market_name: String,
}

/// Parse the listed-instrument finder payload.
pub fn parse_listed_masters(json: &str) -> Result<Vec<StockMaster>, DataError> {
    let resp: ListedResponse = serde_json::from_str(json)
        .map_err(|e| DataError::ResponseFormatChanged(format!("listed masters: {e}")))?;
    Ok(resp
        .block1
        .into_iter()
        .map(|item| StockMaster {
            code: item.full_code,
            short_code: normalize_short_code(&item.short_code),
            company_name: item.code_name,
            market_name: item.market_name,
        })
        .collect())
}

/// Parse the delisted-instrument finder payload.
pub fn parse_delisted_masters(json: &str) -> Result<Vec<StockMaster>, DataError> {
    let resp: DelistedResponse = serde_json::from_str(json)
        .map_err(|e| DataError::ResponseFormatChanged(format!("delisted masters: {e}")))?;
    Ok(resp
        .result
        .into_iter()
        .map(|item| StockMaster {
            code: item.isu_cd,
            short_code: normalize_short_code(&item.shrt_isu_cd),
            company_name: item.isu_nm,
            market_name: item.market_name,
        })
        .collect())
}

/// Listed plus delisted instruments.
pub struct KrxMasterSource {
    client: Arc<KrxClient>,
}

impl KrxMasterSource {
    pub fn new(client: Arc<KrxClient>) -> Self {
        Self { client }
    }

    fn fetch_listed(&self) -> Result<Vec<StockMaster>, DataError> {
        let otp = self.client.generate_otp(&[
            ("bld", "COM/finder_stkisu".into()),
            ("name", "form".into()),
        ])?;
        let body = self.client.finder(&[
            ("no", "P1".into()),
            ("mktsel", "ALL".into()),
            ("pagePath", "/contents/COM/FinderStkIsu.jsp".into()),
            ("code", otp),
            ("pageFirstCall", "Y".into()),
        ])?;
        parse_listed_masters(&body)
    }

    fn fetch_delisted(&self) -> Result<Vec<StockMaster>, DataError> {
        let otp = self.client.generate_otp(&[
            ("bld", "COM/finder_dellist_isu".into()),
            ("name", "form".into()),
        ])?;
        let body = self.client.finder(&[
            ("isuCd", String::new()),
            ("mktsel", "ALL".into()),
            ("searchText", String::new()),
            ("pagePath", "/contents/COM/FinderDelListIsu.jsp".into()),
            ("code", otp),
            ("pageFirstCall", "Y".into()),
        ])?;
        parse_delisted_masters(&body)
    }
}

impl RemoteSource<StockMaster> for KrxMasterSource {
    fn name(&self) -> &str {
        "krx_stock_master"
    }

    fn fetch(
        &self,
        _unit: SyncUnit,
        _ctx: FetchContext<'_>,
    ) -> Result<RecordSet<StockMaster>, DataError> {
        let mut rows = self.fetch_listed()?;
        rows.extend(self.fetch_delisted()?);
        // A code listed and delisted at once means the screens disagree.
        RecordSet::from_rows(rows)
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }
}

// ── Daily prices ────────────────────────────────────────────────────

fn parse_int(raw: &str, column: &str) -> Result<i64, DataError> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || cleaned == "-" {
        return Ok(0);
    }
    cleaned
        .parse::<i64>()
        .or_else(|_| cleaned.parse::<f64>().map(|v| v as i64))
        .map_err(|_| DataError::ResponseFormatChanged(format!("non-numeric {column}: '{raw}'")))
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, DataError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("missing column '{name}'")))
}

/// Parse the all-market daily price CSV for `date`.
///
/// Rows with zero market capitalization are dropped, and rows whose short
/// code is not in `instruments` are dropped (no standard code to key them by).
/// Listed shares are reported in thousands and are scaled to a share count.
pub fn parse_daily_prices(
    csv_text: &str,
    date: NaiveDate,
    instruments: &RecordSet<StockMaster>,
) -> Result<RecordSet<DailyPrice>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(csv_text.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.len() != DAILY_PRICE_COLUMNS {
        return Err(DataError::ResponseFormatChanged(format!(
            "expected {DAILY_PRICE_COLUMNS} daily price columns, got {}",
            headers.len()
        )));
    }

    let short_code = column_index(&headers, "종목코드")?;
    let volume = column_index(&headers, "거래량")?;
    let open = column_index(&headers, "시가")?;
    let high = column_index(&headers, "고가")?;
    let low = column_index(&headers, "저가")?;
    let close = column_index(&headers, "현재가")?;
    let market_cap = column_index(&headers, "시가총액")?;
    let listed = column_index(&headers, "상장주식수(천주)")?;

    let by_short_code: HashMap<&str, &str> = instruments
        .iter()
        .map(|m| (m.short_code.as_str(), m.code.as_str()))
        .collect();
    let timestamp = start_of_day(date);

    let mut prices = RecordSet::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default();

        let cap = parse_int(field(market_cap), "시가총액")?;
        if cap == 0 {
            continue;
        }
        let short = normalize_short_code(field(short_code));
        let Some(code) = by_short_code.get(short.as_str()) else {
            continue;
        };

        prices.insert(DailyPrice {
            code: (*code).to_string(),
            date: timestamp,
            volume: parse_int(field(volume), "거래량")?,
            open: parse_int(field(open), "시가")? as f64,
            high: parse_int(field(high), "고가")? as f64,
            low: parse_int(field(low), "저가")? as f64,
            close: parse_int(field(close), "현재가")? as f64,
            market_capitalization: Some(cap),
            listed_stocks_number: Some(parse_int(field(listed), "상장주식수(천주)")? * 1_000),
        })?;
    }

    Ok(prices)
}

/// All-market daily OHLCV with market capitalization.
pub struct KrxPriceSource {
    client: Arc<KrxClient>,
}

impl KrxPriceSource {
    pub fn new(client: Arc<KrxClient>) -> Self {
        Self { client }
    }
}

impl RemoteSource<DailyPrice> for KrxPriceSource {
    fn name(&self) -> &str {
        "krx_stock_daily_price"
    }

    fn fetch(
        &self,
        unit: SyncUnit,
        ctx: FetchContext<'_>,
    ) -> Result<RecordSet<DailyPrice>, DataError> {
        let date = unit
            .day()
            .ok_or_else(|| DataError::Validation("daily prices are fetched per day".into()))?;

        let otp = self.client.generate_otp(&[
            ("name", "fileDown".into()),
            ("filetype", "csv".into()),
            ("url", "MKD/04/0404/04040200/mkd04040200_01".into()),
            ("market_gubun", "ALL".into()),
            ("indx_ind_cd", String::new()),
            ("sect_tp_cd", "ALL".into()),
            ("schdate", date.format("%Y%m%d").to_string()),
            ("pagePath", "/contents/MKD/04/0404/04040200/MKD04040200.jsp".into()),
        ])?;
        let body = self.client.download(&otp)?;
        parse_daily_prices(&body, date, ctx.instruments)
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }
}

// ── Investor trends ─────────────────────────────────────────────────

/// Parse one instrument's investor trend CSV.
///
/// The download ends with a sum row which is discarded. An empty payload
/// yields `None` (no trading that day).
pub fn parse_investor_trend(
    csv_text: &str,
    code: &str,
    date: NaiveDateTime,
) -> Result<Option<InvestorTrend>, DataError> {
    let lines: Vec<&str> = csv_text.trim_end_matches('\n').lines().collect();
    let body = match lines.split_last() {
        Some((_sum_row, rest)) if !rest.is_empty() => rest.join("\n"),
        _ => return Ok(None),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers()?.clone();
    let investor = column_index(&headers, "투자자명")?;
    let buy = column_index(&headers, "거래량_매수")?;
    let sell = column_index(&headers, "거래량_매도")?;

    let mut flows: HashMap<Investor, Flow> = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let label = record.get(investor).unwrap_or_default();
        if let Some(category) = Investor::from_krx_label(label) {
            flows.insert(
                category,
                Flow {
                    buy: parse_int(record.get(buy).unwrap_or_default(), "거래량_매수")?,
                    sell: parse_int(record.get(sell).unwrap_or_default(), "거래량_매도")?,
                },
            );
        }
    }

    let mut trend = InvestorTrend::new(code, date);
    for category in Investor::ALL {
        let flow = flows.get(&category).ok_or_else(|| {
            DataError::ResponseFormatChanged(format!(
                "investor '{}' missing from trend of {code}",
                category.krx_label()
            ))
        })?;
        trend.set_flow(category, *flow);
    }
    Ok(Some(trend))
}

/// Per-instrument investor trends for one day.
pub struct KrxTrendSource {
    client: Arc<KrxClient>,
}

impl KrxTrendSource {
    pub fn new(client: Arc<KrxClient>) -> Self {
        Self { client }
    }

    fn fetch_one(&self, date: NaiveDate, master: &StockMaster) -> Result<Option<InvestorTrend>, DataError> {
        let day = date.format("%Y%m%d").to_string();
        let otp = self.client.generate_otp(&[
            ("name", "fileDown".into()),
            ("filetype", "csv".into()),
            ("url", "MKD/10/1002/10020101/mkd10020101".into()),
            ("isu_cdnm", format!("{}/{}", master.short_code, master.company_name)),
            ("isu_cd", master.code.clone()),
            ("isu_srt_cd", master.short_code.clone()),
            ("fromdate", day.clone()),
            ("todate", day),
            ("pagePath", "/contents/MKD/10/1002/10020101/MKD10020101.jsp".into()),
        ])?;
        let body = self.client.download(&otp)?;
        parse_investor_trend(&body, &master.code, start_of_day(date))
    }
}

impl RemoteSource<InvestorTrend> for KrxTrendSource {
    fn name(&self) -> &str {
        "krx_stock_trend"
    }

    fn fetch(
        &self,
        unit: SyncUnit,
        ctx: FetchContext<'_>,
    ) -> Result<RecordSet<InvestorTrend>, DataError> {
        let date = unit
            .day()
            .ok_or_else(|| DataError::Validation("investor trends are fetched per day".into()))?;

        let mut trends = RecordSet::new();
        for master in ctx.instruments {
            if let Some(trend) = self.fetch_one(date, master)? {
                trends.insert(trend)?;
            }
        }
        Ok(trends)
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }
}
