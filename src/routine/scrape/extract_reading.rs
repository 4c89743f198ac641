//! Pulls the current reading out of the temperature page.
//!
//! The page carries two custom elements:
//!
//! ```html
//! <temp>18.4 &deg;C</temp>
//! <temp-normal>Letztes Update: 2024-06-01 12:00:00</temp-normal>
//! ```
//!
//! The update time is wall-clock time in Bern.

use std::fmt;
use std::sync::LazyLock;

use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::{AmbiguousOffset, TimeZone};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument};

const PAGE_TIME_ZONE: &str = "Europe/Berlin";
const UPDATE_FORMAT: &str = "Letztes Update: %Y-%m-%d %H:%M:%S";

static TEMP_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<temp(?:\s[^>]*)?>(.*?)</temp\s*>").expect("temp pattern is valid")
});
static TEMP_NORMAL_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<temp-normal(?:\s[^>]*)?>(.*?)</temp-normal\s*>")
        .expect("temp-normal pattern is valid")
});
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("markup pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("<temp> not found in page")]
    TemperatureMissing,

    #[error("<temp-normal> not found in page")]
    TimestampMissing,

    #[error("'{0}' is not a temperature")]
    InvalidTemperature(String),

    #[error("'{text}' is not an update time: {reason}")]
    InvalidTimestamp { text: String, reason: String },
}

/// One water temperature measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterReading {
    /// Degrees Celsius
    pub temperature: f64,
    pub measured_at: Timestamp,
}

impl WaterReading {
    /// RFC 3339 in UTC, as the backend expects it: `2024-06-01T10:00:00+00:00`
    pub fn wire_time(&self) -> String {
        self.measured_at
            .to_zoned(TimeZone::UTC)
            .strftime("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    }
}

impl fmt::Display for WaterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} °C at {}", self.temperature, self.wire_time())
    }
}

#[instrument("extract_reading", level = "debug", skip_all)]
pub fn extract_reading(page: &str) -> Result<WaterReading, ExtractError> {
    let temperature_text =
        element_text(&TEMP_ELEMENT, page).ok_or(ExtractError::TemperatureMissing)?;
    let timestamp_text =
        element_text(&TEMP_NORMAL_ELEMENT, page).ok_or(ExtractError::TimestampMissing)?;
    debug!("temperature: '{temperature_text}', update: '{timestamp_text}'");

    Ok(WaterReading {
        temperature: parse_temperature(&temperature_text)?,
        measured_at: parse_update_time(&timestamp_text)?,
    })
}

/// Text content of the first matching element, markup stripped and whitespace collapsed.
fn element_text(element: &Regex, page: &str) -> Option<String> {
    let inner = element.captures(page)?.get(1)?.as_str();
    let text = decode_entities(&MARKUP.replace_all(inner, " "));
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn decode_entities(text: &str) -> String {
    text.replace("&deg;", "°")
        .replace("&#176;", "°")
        .replace("&#xB0;", "°")
        .replace("&#xb0;", "°")
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&amp;", "&")
}

fn parse_temperature(text: &str) -> Result<f64, ExtractError> {
    let invalid = || ExtractError::InvalidTemperature(text.to_string());
    let number = text.split('°').next().unwrap_or_default().trim();
    let value: f64 = number.replace(',', ".").parse().map_err(|_| invalid())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn parse_update_time(text: &str) -> Result<Timestamp, ExtractError> {
    let invalid = |reason: jiff::Error| ExtractError::InvalidTimestamp {
        text: text.to_string(),
        reason: reason.to_string(),
    };
    let local = DateTime::strptime(UPDATE_FORMAT, text).map_err(invalid)?;
    let ambiguous = TimeZone::get(PAGE_TIME_ZONE)
        .map_err(invalid)?
        .to_ambiguous_zoned(local);
    // Standard time wins in the autumn fold; a spring gap keeps the offset before it.
    let zoned = match ambiguous.offset() {
        AmbiguousOffset::Fold { .. } => ambiguous.later(),
        _ => ambiguous.earlier(),
    }
    .map_err(invalid)?;
    Ok(zoned.timestamp())
}
