//! Live data sources for briefings and call context.
//!
//! Every fetcher returns a plain `Result<String>`; deciding what to say when
//! one fails is left to the caller.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use callie_core::briefing::{crypto_phrase, equities_phrase, weather_phrase, WeatherReading};
use callie_core::portfolio::{parse_portfolio, portfolio_summary};
use callie_core::{CallieError, Result};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const SP500_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart/%5EGSPC?interval=1d&range=1d";
const BITCOIN_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd&include_24hr_change=true";

/// Shared HTTP client for informational fetches.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("Mozilla/5.0")
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default()
}

async fn get_json<T: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    timeout: Duration,
) -> Result<T> {
    let resp = client
        .get(url)
        .header("Accept", "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CallieError::timeout(service, timeout)
            } else {
                CallieError::transport(service, e)
            }
        })?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(CallieError::vendor(service, Some(status.as_u16()), text));
    }
    resp.json::<T>()
        .await
        .map_err(|e| CallieError::vendor(service, Some(status.as_u16()), format!("bad response: {e}")))
}

/// Run a shell command line and return its trimmed stdout.
///
/// A non-zero exit is an error. The child is killed if the returned future
/// is dropped (e.g. by a timeout).
pub async fn run_command(cmd: &str) -> Result<String> {
    debug!("running: {cmd}");
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CallieError::transport("command", e))?;
    if !output.status.success() {
        return Err(CallieError::vendor(
            "command",
            None,
            format!("`{cmd}` exited with {}", output.status),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ─── Weather ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ForecastResponse {
    current: ForecastCurrent,
    daily: ForecastDaily,
}

#[derive(Deserialize)]
struct ForecastCurrent {
    temperature_2m: f64,
    weather_code: u32,
}

#[derive(Deserialize)]
struct ForecastDaily {
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    precipitation_probability_max: Vec<Option<f64>>,
}

impl ForecastResponse {
    fn reading(&self) -> Option<WeatherReading> {
        Some(WeatherReading {
            current: self.current.temperature_2m,
            code: self.current.weather_code,
            high: *self.daily.temperature_2m_max.first()?,
            low: *self.daily.temperature_2m_min.first()?,
            precipitation_chance: self
                .daily
                .precipitation_probability_max
                .first()
                .copied()
                .flatten()
                .unwrap_or(0.0),
        })
    }
}

/// Today's forecast from Open-Meteo, retried once on failure.
pub async fn weather(client: &reqwest::Client, city: &str, latitude: f64, longitude: f64) -> Result<String> {
    let url = format!(
        "{OPEN_METEO_URL}?latitude={latitude}&longitude={longitude}\
         &current=temperature_2m,weather_code\
         &daily=temperature_2m_max,temperature_2m_min,precipitation_probability_max\
         &temperature_unit=celsius&timezone=auto&forecast_days=1"
    );
    let timeout = Duration::from_secs(10);
    let forecast: ForecastResponse = match get_json(client, "open-meteo", &url, timeout).await {
        Ok(f) => f,
        Err(e) => {
            warn!("weather fetch failed (attempt 1): {e}");
            get_json(client, "open-meteo", &url, timeout).await?
        }
    };
    let reading = forecast
        .reading()
        .ok_or_else(|| CallieError::vendor("open-meteo", None, "forecast has no daily values"))?;
    Ok(weather_phrase(city, &reading))
}

/// One-line current conditions from wttr.in, e.g. `Brookswood: ⛅️ +11°C`.
pub async fn weather_line(client: &reqwest::Client, location: &str) -> Result<String> {
    let url = format!("https://wttr.in/{location}?format=3");
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| CallieError::transport("wttr.in", e))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(CallieError::vendor("wttr.in", Some(status.as_u16()), "weather lookup failed"));
    }
    let text = resp.text().await.map_err(|e| CallieError::transport("wttr.in", e))?;
    Ok(text.trim().to_string())
}

// ─── Markets ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    #[serde(default)]
    result: Vec<ChartResult>,
}

#[derive(Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: f64,
    chart_previous_close: f64,
}

pub async fn equities(client: &reqwest::Client) -> Result<String> {
    let chart: ChartResponse = get_json(client, "yahoo-finance", SP500_URL, Duration::from_secs(8)).await?;
    let meta = &chart
        .chart
        .result
        .first()
        .ok_or_else(|| CallieError::vendor("yahoo-finance", None, "empty chart result"))?
        .meta;
    index_phrase(meta.regular_market_price, meta.chart_previous_close)
}

/// A missing or zero previous close cannot yield a percentage.
fn index_phrase(price: f64, previous_close: f64) -> Result<String> {
    if !price.is_finite() || !previous_close.is_finite() || previous_close <= 0.0 {
        return Err(CallieError::vendor(
            "yahoo-finance",
            None,
            format!("unusable quote: price {price}, previous close {previous_close}"),
        ));
    }
    Ok(equities_phrase(price, previous_close))
}

#[derive(Deserialize)]
struct CoinPrices {
    bitcoin: CoinPrice,
}

#[derive(Deserialize)]
struct CoinPrice {
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

pub async fn crypto(client: &reqwest::Client) -> Result<String> {
    let prices: CoinPrices = get_json(client, "coingecko", BITCOIN_URL, Duration::from_secs(8)).await?;
    Ok(crypto_phrase(prices.bitcoin.usd_24h_change.unwrap_or(0.0)))
}

// ─── Local files ───────────────────────────────────────────────────────────

/// Spoken summary of the finance dashboard at `path`; empty when it lists
/// nothing.
pub async fn portfolio(path: &Path) -> Result<String> {
    let html = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CallieError::config(format!("cannot read {}: {e}", path.display())))?;
    Ok(portfolio_summary(&parse_portfolio(&html)))
}

/// One entry in the action-item file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    /// `YYYY-MM-DD`; the item is due on and after this date.
    pub date: NaiveDate,
    pub text: String,
    /// Removed from the file once it has been read out.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub oneshot: bool,
}

/// Split items into those due by `today` and those to keep on file.
pub fn due_items(items: &[ActionItem], today: NaiveDate) -> (Vec<&ActionItem>, Vec<ActionItem>) {
    let due = items.iter().filter(|i| i.date <= today).collect();
    let keep = items
        .iter()
        .filter(|i| !(i.date <= today && i.oneshot))
        .cloned()
        .collect();
    (due, keep)
}

/// Due action items joined into one sentence run. One-shot items are
/// dropped from the file after being read.
pub async fn action_items(path: &Path, today: NaiveDate) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CallieError::config(format!("cannot read {}: {e}", path.display())))?;
    let items: Vec<ActionItem> = serde_json::from_str(&raw)
        .map_err(|e| CallieError::validation(format!("{} is not a valid item list: {e}", path.display())))?;

    let (due, keep) = due_items(&items, today);
    if due.is_empty() {
        return Ok(String::new());
    }
    let text = due.iter().map(|i| i.text.as_str()).collect::<Vec<_>>().join(". ");

    if keep.len() != items.len() {
        let mut json = serde_json::to_string_pretty(&keep)
            .map_err(|e| CallieError::validation(format!("cannot encode items: {e}")))?;
        json.push('\n');
        tokio::fs::write(path, json)
            .await
            .map_err(|e| CallieError::config(format!("cannot write {}: {e}", path.display())))?;
    }
    Ok(text)
}

/// Reminder titles out of tab-separated command output (last column).
pub fn reminder_titles(raw: &str) -> Vec<&str> {
    raw.lines()
        .filter_map(|l| l.split('\t').next_back())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}
