use crate::config::Settings;
use crate::domain::DailyBar;
use crate::ingest::provider::{is_valid_bar, retry_backoff};
use crate::ingest::{Constituent, ConstituentSource, MarketDataProvider};
use crate::time::kr_market::CalendarProvider;
use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone};
use encoding_rs::EUC_KR;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

const PROD_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";

const KOSPI_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kospi_code.mst.zip";
const KOSDAQ_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kosdaq_code.mst.zip";
const KONEX_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/konex_code.mst.zip";

const TR_DAILY_CHART: &str = "FHKST03010100";
const TR_CURRENT_PRICE: &str = "FHKST01010100";
const TR_HOLIDAY: &str = "CTCA0903R";

// `hts_avls` is quoted in units of 100 million KRW.
const HTS_AVLS_UNIT: f64 = 100_000_000.0;

const MAX_ITEM_ATTEMPTS: u32 = 3;
const MAX_LOGGED_FAILURES: usize = 5;

/// Korea Investment & Securities Open API client.
#[derive(Debug)]
pub struct KisClient {
    http: reqwest::Client,
    base_url: String,
    appkey: String,
    appsecret: String,
    req_delay: Duration,
    markets: Vec<KisMarket>,

    // Cache token within a single process run to avoid repeated token issuance.
    token_cache: tokio::sync::Mutex<Option<CachedToken>>,
    // Spaces requests across every concurrent batch sharing this client.
    last_request: tokio::sync::Mutex<Instant>,
    holidays: tokio::sync::Mutex<HashMap<NaiveDate, bool>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: KisToken,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KisMarket {
    Kospi,
    Kosdaq,
    Konex,
}

impl KisMarket {
    fn master_url(&self) -> &'static str {
        match self {
            KisMarket::Kospi => KOSPI_MASTER_ZIP,
            KisMarket::Kosdaq => KOSDAQ_MASTER_ZIP,
            KisMarket::Konex => KONEX_MASTER_ZIP,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            KisMarket::Kospi => "kospi",
            KisMarket::Kosdaq => "kosdaq",
            KisMarket::Konex => "konex",
        }
    }
}

impl KisClient {
    pub fn from_settings_prod(_settings: &Settings) -> Result<Self> {
        let appkey = std::env::var("KIS_APPKEY").context("KIS_APPKEY is required")?;
        let appsecret = std::env::var("KIS_APPSECRET").context("KIS_APPSECRET is required")?;

        let base_url = std::env::var("KIS_BASE_URL").unwrap_or_else(|_| PROD_BASE_URL.to_string());
        let req_delay_ms = std::env::var("KIS_REQ_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);

        let markets = parse_markets(std::env::var("KIS_MARKETS").ok());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build KIS http client")?;

        let req_delay = Duration::from_millis(req_delay_ms);
        let last_request = Instant::now().checked_sub(req_delay).unwrap_or_else(Instant::now);

        Ok(Self {
            http,
            base_url,
            appkey,
            appsecret,
            req_delay,
            markets,
            token_cache: tokio::sync::Mutex::new(None),
            last_request: tokio::sync::Mutex::new(last_request),
            holidays: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn markets(&self) -> &[KisMarket] {
        &self.markets
    }

    /// Master-file constituent source for one market. Needs no credentials.
    pub fn master_source(&self, market: KisMarket) -> KisMasterSource {
        KisMasterSource {
            http: self.http.clone(),
            market,
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        let next = *last + self.req_delay;
        let now = Instant::now();
        if next > now {
            tokio::time::sleep(next - now).await;
        }
        *last = Instant::now();
    }

    async fn get_access_token_cached(&self) -> Result<KisToken> {
        let mut guard = self.token_cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !cached.token.is_expired_or_stale(cached.fetched_at) {
                return Ok(cached.token.clone());
            }
        }

        let fetched_at = chrono::Utc::now();
        let token = self.fetch_access_token().await?;
        *guard = Some(CachedToken {
            token: token.clone(),
            fetched_at,
        });
        Ok(token)
    }

    async fn fetch_access_token(&self) -> Result<KisToken> {
        let url = format!("{}/oauth2/tokenP", self.base_url.trim_end_matches('/'));
        let req = KisTokenRequest {
            grant_type: "client_credentials",
            appkey: &self.appkey,
            appsecret: &self.appsecret,
        };

        let res = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/plain")
            .header("charset", "UTF-8")
            .json(&req)
            .send()
            .await
            .context("KIS token request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read KIS token response")?;
        if !status.is_success() {
            anyhow::bail!("KIS token HTTP {status}: {text}");
        }

        serde_json::from_str::<KisToken>(&text).context("failed to parse KIS token response")
    }

    fn headers(&self, token: &KisToken, tr_id: &'static str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token.access_token))?,
        );
        headers.insert("appkey", HeaderValue::from_str(&self.appkey)?);
        headers.insert("appsecret", HeaderValue::from_str(&self.appsecret)?);
        headers.insert("tr_id", HeaderValue::from_static(tr_id));
        headers.insert("custtype", HeaderValue::from_static("P"));
        headers.insert("tr_cont", HeaderValue::from_static(""));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("accept", HeaderValue::from_static("text/plain"));
        headers.insert("charset", HeaderValue::from_static("UTF-8"));
        Ok(headers)
    }

    /// GET a quotations endpoint, retrying transport errors, 429/5xx and
    /// unparseable bodies.
    async fn get_quotation<T: DeserializeOwned>(
        &self,
        token: &KisToken,
        tr_id: &'static str,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let headers = self.headers(token, tr_id)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.throttle().await;

            let res = self
                .http
                .get(url.clone())
                .headers(headers.clone())
                .query(params)
                .send()
                .await;

            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= MAX_ITEM_ATTEMPTS {
                        return Err(err).with_context(|| format!("KIS {tr_id} request failed"));
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, tr_id, error = %err, "KIS request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .with_context(|| format!("failed to read KIS {tr_id} response"))?;

            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < MAX_ITEM_ATTEMPTS {
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, tr_id, http_status = %status, "KIS HTTP error; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                anyhow::bail!("KIS {tr_id} HTTP {status}: {text}");
            }

            match serde_json::from_str::<KisEnvelope<T>>(&text) {
                Ok(env) if env.rt_cd == "0" => return Ok(env.body),
                Ok(env) => anyhow::bail!("KIS {tr_id} rt_cd={}: {}", env.rt_cd, env.msg1),
                Err(err) => {
                    if attempt >= MAX_ITEM_ATTEMPTS {
                        return Err(err).with_context(|| format!("failed to parse KIS {tr_id} response"));
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, tr_id, error = %err, "KIS response parse failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_one_daily_bars(
        &self,
        token: &KisToken,
        code: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<DailyBar>> {
        let params = [
            ("FID_COND_MRKT_DIV_CODE", "J"),
            ("FID_INPUT_ISCD", code),
            ("FID_INPUT_DATE_1", start),
            ("FID_INPUT_DATE_2", end),
            ("FID_PERIOD_DIV_CODE", "D"),
            ("FID_ORG_ADJ_PRC", "1"),
        ];

        let body: KisDailyChartBody = self
            .get_quotation(
                token,
                TR_DAILY_CHART,
                "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
                &params,
            )
            .await?;

        let mut bars: Vec<DailyBar> = body
            .output2
            .iter()
            .filter_map(KisDailyBar::to_bar)
            .filter(is_valid_bar)
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    async fn fetch_one_market_cap(&self, token: &KisToken, code: &str) -> Result<f64> {
        let params = [("FID_COND_MRKT_DIV_CODE", "J"), ("FID_INPUT_ISCD", code)];
        let body: KisPriceBody = self
            .get_quotation(
                token,
                TR_CURRENT_PRICE,
                "/uapi/domestic-stock/v1/quotations/inquire-price",
                &params,
            )
            .await?;

        let avls = parse_num(&body.output.hts_avls).context("missing hts_avls")?;
        Ok(avls * HTS_AVLS_UNIT)
    }

    async fn fetch_holidays_from(&self, date: NaiveDate) -> Result<Vec<(NaiveDate, bool)>> {
        let token = self.get_access_token_cached().await?;
        let bass_dt = date.format("%Y%m%d").to_string();
        let params = [
            ("BASS_DT", bass_dt.as_str()),
            ("CTX_AREA_NK", ""),
            ("CTX_AREA_FK", ""),
        ];

        let body: KisHolidayBody = self
            .get_quotation(
                &token,
                TR_HOLIDAY,
                "/uapi/domestic-stock/v1/quotations/chk-holiday",
                &params,
            )
            .await?;

        Ok(body
            .output
            .iter()
            .filter_map(|row| {
                let d = NaiveDate::parse_from_str(row.bass_dt.trim(), "%Y%m%d").ok()?;
                Some((d, row.opnd_yn.trim().eq_ignore_ascii_case("Y")))
            })
            .collect())
    }
}

/// Runs `fetch` per ticker, skipping failures. The batch only errors when
/// every ticker failed, which usually means auth or transport trouble.
async fn per_ticker<T, F, Fut>(label: &'static str, tickers: &[String], fetch: F) -> Result<BTreeMap<String, T>>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut out = BTreeMap::new();
    let mut failures: usize = 0;
    let mut last_err: Option<anyhow::Error> = None;

    for ticker in tickers {
        match fetch(ticker.clone()).await {
            Ok(v) => {
                out.insert(ticker.clone(), v);
            }
            Err(err) => {
                failures += 1;
                if failures <= MAX_LOGGED_FAILURES {
                    tracing::warn!(label, ticker = %ticker, failure_count = failures, error = %err, "KIS fetch failed; skipping ticker");
                }
                last_err = Some(err);
            }
        }
    }

    if out.is_empty() && !tickers.is_empty() {
        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no tickers served"));
        return Err(err.context(format!("KIS {label}: all {} tickers failed", tickers.len())));
    }

    Ok(out)
}

#[async_trait::async_trait]
impl MarketDataProvider for KisClient {
    fn provider_name(&self) -> &'static str {
        "kis"
    }

    async fn fetch_daily_bars(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyBar>>> {
        let token = self.get_access_token_cached().await?;
        let start = start.format("%Y%m%d").to_string();
        let end = end.format("%Y%m%d").to_string();

        per_ticker("daily_bars", tickers, |code| {
            let token = &token;
            let (start, end) = (&start, &end);
            async move { self.fetch_one_daily_bars(token, &code, start, end).await }
        })
        .await
    }

    async fn fetch_market_caps(
        &self,
        tickers: &[String],
        _as_of_date: NaiveDate,
    ) -> Result<BTreeMap<String, f64>> {
        // inquire-price reports the latest cap; the collector tolerates that lag.
        let token = self.get_access_token_cached().await?;
        per_ticker("market_caps", tickers, |code| {
            let token = &token;
            async move { self.fetch_one_market_cap(token, &code).await }
        })
        .await
    }
}

#[async_trait::async_trait]
impl CalendarProvider for KisClient {
    fn calendar_name(&self) -> &'static str {
        "kis_chk_holiday"
    }

    async fn is_session(&self, date: NaiveDate) -> Result<bool> {
        if let Some(open) = self.holidays.lock().await.get(&date) {
            return Ok(*open);
        }

        let rows = self.fetch_holidays_from(date).await?;
        let mut cache = self.holidays.lock().await;
        cache.extend(rows);
        cache
            .get(&date)
            .copied()
            .with_context(|| format!("KIS holiday response did not cover {date}"))
    }
}

/// KOSPI/KOSDAQ/KONEX master-file listing.
#[derive(Debug, Clone)]
pub struct KisMasterSource {
    http: reqwest::Client,
    market: KisMarket,
}

#[async_trait::async_trait]
impl ConstituentSource for KisMasterSource {
    fn source_name(&self) -> String {
        format!("kis_master:{}", self.market.as_str())
    }

    async fn fetch_constituents(&self) -> Result<Vec<Constituent>> {
        fetch_and_parse_master_zip(&self.http, self.market.master_url()).await
    }
}

#[derive(Debug, Serialize)]
struct KisTokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KisToken {
    pub access_token: String,
    #[serde(default)]
    pub access_token_token_expired: String,

    #[serde(default)]
    pub expires_in: u64,
}

impl KisToken {
    fn is_expired_or_stale(&self, fetched_at: chrono::DateTime<chrono::Utc>) -> bool {
        // Prefer the server-provided absolute expiry when available.
        if let Some(exp) = parse_kis_expiry_utc(&self.access_token_token_expired) {
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        if self.expires_in > 0 {
            let exp = fetched_at + chrono::Duration::seconds(self.expires_in as i64);
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        true
    }
}

fn parse_kis_expiry_utc(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    // Observed format: "YYYY-MM-DD HH:MM:SS" (KST).
    let naive = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S").ok()?;
    let kst = chrono::FixedOffset::east_opt(9 * 3600)?;
    let dt = kst.from_local_datetime(&naive).single()?;
    Some(dt.with_timezone(&chrono::Utc))
}

#[derive(Debug, Clone, Deserialize)]
struct KisEnvelope<T> {
    #[serde(default)]
    rt_cd: String,
    #[serde(default)]
    msg1: String,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyChartBody {
    #[serde(default)]
    output2: Vec<KisDailyBar>,
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyBar {
    #[serde(default)]
    stck_bsop_date: String,
    #[serde(default)]
    stck_oprc: String,
    #[serde(default)]
    stck_hgpr: String,
    #[serde(default)]
    stck_lwpr: String,
    #[serde(default)]
    stck_clpr: String,
    #[serde(default)]
    acml_vol: String,
}

impl KisDailyBar {
    // KIS pads short histories with empty objects.
    fn to_bar(&self) -> Option<DailyBar> {
        Some(DailyBar {
            date: NaiveDate::parse_from_str(self.stck_bsop_date.trim(), "%Y%m%d").ok()?,
            open: parse_num(&self.stck_oprc)?,
            high: parse_num(&self.stck_hgpr)?,
            low: parse_num(&self.stck_lwpr)?,
            close: parse_num(&self.stck_clpr)?,
            volume: parse_num(&self.acml_vol)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct KisPriceBody {
    output: KisPriceOutput,
}

#[derive(Debug, Clone, Deserialize)]
struct KisPriceOutput {
    #[serde(default)]
    hts_avls: String,
}

#[derive(Debug, Clone, Deserialize)]
struct KisHolidayBody {
    #[serde(default)]
    output: Vec<KisHolidayRow>,
}

#[derive(Debug, Clone, Deserialize)]
struct KisHolidayRow {
    #[serde(default)]
    bass_dt: String,
    #[serde(default)]
    opnd_yn: String,
}

fn parse_markets(v: Option<String>) -> Vec<KisMarket> {
    let Some(v) = v else {
        return vec![KisMarket::Kospi, KisMarket::Kosdaq];
    };
    let mut out = Vec::new();
    for part in v.split(',') {
        let market = match part.trim().to_ascii_uppercase().as_str() {
            "KOSPI" => KisMarket::Kospi,
            "KOSDAQ" => KisMarket::Kosdaq,
            "KONEX" => KisMarket::Konex,
            _ => continue,
        };
        if !out.contains(&market) {
            out.push(market);
        }
    }
    if out.is_empty() {
        out.push(KisMarket::Kospi);
        out.push(KisMarket::Kosdaq);
    }
    out
}

fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

async fn fetch_and_parse_master_zip(http: &reqwest::Client, url: &str) -> Result<Vec<Constituent>> {
    let res = http
        .get(url)
        .send()
        .await
        .context("master zip download failed")?;
    let status = res.status();
    let bytes = res.bytes().await.context("read master zip bytes failed")?;
    if !status.is_success() {
        anyhow::bail!("master zip HTTP {status}");
    }

    let bytes_vec = bytes.to_vec();
    tokio::task::spawn_blocking(move || unzip_and_parse_master(&bytes_vec))
        .await
        .context("join unzip task failed")?
}

fn unzip_and_parse_master(zip_bytes: &[u8]) -> Result<Vec<Constituent>> {
    use std::io::{Cursor, Read};

    let mut zip = zip::ZipArchive::new(Cursor::new(zip_bytes)).context("open zip archive failed")?;
    anyhow::ensure!(!zip.is_empty(), "zip has no entries");

    let mut idx = 0;
    for i in 0..zip.len() {
        let entry = zip.by_index(i).context("open zip entry failed")?;
        if entry.name().to_ascii_lowercase().ends_with(".mst") {
            idx = i;
            break;
        }
    }

    let mut file = zip.by_index(idx).context("open zip entry failed")?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context("read zip entry failed")?;

    Ok(parse_master_lines(&buf))
}

fn parse_master_lines(buf: &[u8]) -> Vec<Constituent> {
    buf.split(|b| *b == b'\n')
        .filter_map(|line| parse_master_line(line.strip_suffix(b"\r").unwrap_or(line)))
        .collect()
}

// Layout: 6-digit code, padding, 12-byte ISIN, EUC-KR name, then a group
// code starting with "ST" for common stock.
fn parse_master_line(line: &[u8]) -> Option<Constituent> {
    let code = line.get(0..6)?;
    if !code.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut i = 6;
    while i < line.len() && line[i].is_ascii_whitespace() {
        i += 1;
    }

    let name_start = if line.len() >= i + 12 {
        i + 12
    } else {
        while i < line.len() && !line[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    let after_isin = line.get(name_start..).filter(|s| !s.is_empty())?;
    let name_end = find_st_marker(after_isin).unwrap_or(after_isin.len());
    let name = decode_euc_kr_trim(&after_isin[..name_end]);
    if name.is_empty() {
        return None;
    }

    Some(Constituent {
        ticker: String::from_utf8_lossy(code).into_owned(),
        name,
    })
}

fn find_st_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(2)
        .enumerate()
        .find(|(i, w)| *w == b"ST" && (*i == 0 || bytes[i - 1].is_ascii_whitespace()))
        .map(|(i, _)| i)
}

fn decode_euc_kr_trim(bytes: &[u8]) -> String {
    let is_pad = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |p| p + 1);

    let (cow, _, _) = EUC_KR.decode(&bytes[start..end]);
    cow.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_line_with_code_prefix() {
        let mut line = b"005930   KR7005930003".to_vec();
        let (name_bytes, _, _) = EUC_KR.encode("삼성전자");
        line.extend_from_slice(&name_bytes);
        line.extend_from_slice(b"                ST1002700\r\n");
        line.extend_from_slice(b"HEADER LINE\n");

        let parsed = parse_master_lines(&line);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].ticker, "005930");
        assert_eq!(parsed[0].name, "삼성전자");
    }

    #[test]
    fn parses_token_expiry_fields() {
        let s = r#"{
            "access_token": "secret",
            "token_type": "Bearer",
            "expires_in": 86400,
            "access_token_token_expired": "2026-01-30 05:00:44"
        }"#;

        let tok: KisToken = serde_json::from_str(s).unwrap();
        assert_eq!(tok.expires_in, 86400);
        let dt = parse_kis_expiry_utc(&tok.access_token_token_expired).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-29T20:00:44+00:00");
    }

    #[test]
    fn parses_daily_chart_and_skips_padding_rows() {
        let s = r#"{
            "rt_cd": "0",
            "msg1": "정상처리 되었습니다.",
            "output2": [
                {"stck_bsop_date": "20260127", "stck_oprc": "100", "stck_hgpr": "110", "stck_lwpr": "95", "stck_clpr": "105", "acml_vol": "12345"},
                {}
            ]
        }"#;
        let env: KisEnvelope<KisDailyChartBody> = serde_json::from_str(s).unwrap();
        assert_eq!(env.rt_cd, "0");
        let bars: Vec<_> = env.body.output2.iter().filter_map(KisDailyBar::to_bar).collect();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2026, 1, 27).unwrap());
    }

    #[test]
    fn parses_price_and_holiday_bodies() {
        let price: KisEnvelope<KisPriceBody> =
            serde_json::from_str(r#"{"rt_cd":"0","msg1":"","output":{"hts_avls":"4500000"}}"#).unwrap();
        let cap = parse_num(&price.body.output.hts_avls).unwrap() * HTS_AVLS_UNIT;
        assert_eq!(cap, 4.5e14);

        let hol: KisEnvelope<KisHolidayBody> = serde_json::from_str(
            r#"{"rt_cd":"0","msg1":"","output":[{"bass_dt":"20260101","opnd_yn":"N"},{"bass_dt":"20260102","opnd_yn":"Y"}]}"#,
        )
        .unwrap();
        assert_eq!(hol.body.output.len(), 2);
        assert_eq!(hol.body.output[1].opnd_yn, "Y");
    }

    #[test]
    fn parses_market_list() {
        assert_eq!(parse_markets(None), vec![KisMarket::Kospi, KisMarket::Kosdaq]);
        assert_eq!(
            parse_markets(Some("kosdaq, KOSDAQ ,konex".into())),
            vec![KisMarket::Kosdaq, KisMarket::Konex]
        );
        assert_eq!(parse_markets(Some("nyse".into())).len(), 2);
    }
}
