//! Runtime settings of the scraper, injected by the descriptor's env sources.

use std::time::Duration;

use clap::Args;
use duration_string::DurationString;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TEMPERATURE_URL: &str = "https://www.aare-bern.ch/wasserdaten-temperatur/";
pub const DEFAULT_BACKEND_URL: &str = "http://api:80";
pub const DEFAULT_BACKEND_PATH: &str = "lake/{}/temperature";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Args)]
pub struct ScrapeArgs {
    /// Page publishing the current Aare water temperature
    #[arg(long, env = "TEMPERATURE_URL", default_value = DEFAULT_TEMPERATURE_URL)]
    pub temperature_url: String,

    /// Base URL of the lake backend
    #[arg(long, env = "BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Path below the backend URL; `{}` is replaced by the lake UUID
    #[arg(long, env = "BACKEND_PATH", default_value = DEFAULT_BACKEND_PATH)]
    pub backend_path: String,

    #[arg(long, env = "AARE_UUID", hide_env_values = true)]
    pub lake_uuid: Option<String>,

    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Timeout applied to every HTTP request
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Args)]
pub struct AlertArgs {
    /// Telegram bot token used for failure alerts
    #[arg(long = "telegram-token", env = "TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Comma separated Telegram chat ids receiving failure alerts
    #[arg(long = "telegram-chats", env = "TELEGRAM_CHATLIST", value_delimiter = ',')]
    pub telegram_chats: Vec<String>,

    #[arg(long, env = "TELEGRAM_API_URL", default_value = DEFAULT_TELEGRAM_API_URL)]
    pub telegram_api_url: String,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    value
        .parse::<DurationString>()
        .map(Duration::from)
        .map_err(|e| e.to_string())
}

/// Validated scrape settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    pub temperature_url: Url,
    /// Full URL the reading is PUT to
    pub backend_endpoint: Url,
    pub api_key: String,
    pub http_timeout: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeConfigError {
    #[error("AARE_UUID not defined")]
    MissingLakeUuid,

    #[error("API_KEY not defined")]
    MissingApiKey,

    #[error("{name} '{value}' is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        source: url::ParseError,
    },

    #[error("BACKEND_PATH '{0}' must contain exactly one '{{}}' placeholder")]
    BackendPathPlaceholder(String),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.trim().to_string()
    }
}

fn parse_url(name: &'static str, value: String) -> Result<Url, ScrapeConfigError> {
    Url::parse(&value).map_err(|source| ScrapeConfigError::InvalidUrl {
        name,
        value,
        source,
    })
}

impl TryFrom<ScrapeArgs> for ScrapeConfig {
    type Error = ScrapeConfigError;

    fn try_from(args: ScrapeArgs) -> Result<Self, Self::Error> {
        let lake_uuid = non_empty(args.lake_uuid).ok_or(ScrapeConfigError::MissingLakeUuid)?;
        let api_key = non_empty(args.api_key).ok_or(ScrapeConfigError::MissingApiKey)?;

        let temperature_url = parse_url(
            "TEMPERATURE_URL",
            or_default(args.temperature_url, DEFAULT_TEMPERATURE_URL),
        )?;

        let backend_path = or_default(args.backend_path, DEFAULT_BACKEND_PATH);
        if backend_path.matches("{}").count() != 1 {
            return Err(ScrapeConfigError::BackendPathPlaceholder(backend_path));
        }
        let backend_url = or_default(args.backend_url, DEFAULT_BACKEND_URL);
        let endpoint = format!(
            "{}/{}",
            backend_url.trim_end_matches('/'),
            backend_path
                .trim_start_matches('/')
                .replace("{}", lake_uuid.trim())
        );
        let backend_endpoint = parse_url("BACKEND_URL", endpoint)?;

        Ok(ScrapeConfig {
            temperature_url,
            backend_endpoint,
            api_key,
            http_timeout: args.http_timeout,
        })
    }
}

/// Where failure alerts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub telegram_token: Option<String>,
    pub telegram_chats: Vec<String>,
    pub telegram_api_url: String,
}

impl From<AlertArgs> for AlertConfig {
    fn from(args: AlertArgs) -> Self {
        AlertConfig {
            telegram_token: non_empty(args.telegram_token),
            telegram_chats: args
                .telegram_chats
                .into_iter()
                .map(|chat| chat.trim().to_string())
                .filter(|chat| !chat.is_empty())
                .collect(),
            telegram_api_url: or_default(args.telegram_api_url, DEFAULT_TELEGRAM_API_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ScrapeArgs {
        ScrapeArgs {
            temperature_url: DEFAULT_TEMPERATURE_URL.to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_path: DEFAULT_BACKEND_PATH.to_string(),
            lake_uuid: Some("9a2e6c1e-5a3b-4c1f-8e5d-0f1b2c3d4e5f".to_string()),
            api_key: Some("secret".to_string()),
            http_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_backend_endpoint_joins_url_and_path() {
        let config = ScrapeConfig::try_from(args()).unwrap();
        assert_eq!(
            config.backend_endpoint.as_str(),
            "http://api/lake/9a2e6c1e-5a3b-4c1f-8e5d-0f1b2c3d4e5f/temperature"
        );
        assert_eq!(config.temperature_url.as_str(), DEFAULT_TEMPERATURE_URL);
    }

    #[test]
    fn test_slashes_are_not_doubled() {
        let mut args = args();
        args.backend_url = "https://backend.example/api/".to_string();
        args.backend_path = "/lakes/{}/temp".to_string();
        let config = ScrapeConfig::try_from(args).unwrap();
        assert_eq!(
            config.backend_endpoint.as_str(),
            "https://backend.example/api/lakes/9a2e6c1e-5a3b-4c1f-8e5d-0f1b2c3d4e5f/temp"
        );
    }

    #[test]
    fn test_missing_or_blank_secrets() {
        let mut args = args();
        args.lake_uuid = Some("  ".to_string());
        assert_eq!(
            ScrapeConfig::try_from(args),
            Err(ScrapeConfigError::MissingLakeUuid)
        );

        let mut args = self::args();
        args.api_key = None;
        assert_eq!(
            ScrapeConfig::try_from(args),
            Err(ScrapeConfigError::MissingApiKey)
        );
    }

    #[test]
    fn test_blank_urls_fall_back_to_defaults() {
        let mut args = args();
        args.backend_url = String::new();
        args.backend_path = String::new();
        let config = ScrapeConfig::try_from(args).unwrap();
        assert!(config.backend_endpoint.as_str().starts_with("http://api/lake/"));
    }

    #[test]
    fn test_backend_path_needs_one_placeholder() {
        let mut args = args();
        args.backend_path = "lake/temperature".to_string();
        assert_eq!(
            ScrapeConfig::try_from(args),
            Err(ScrapeConfigError::BackendPathPlaceholder(
                "lake/temperature".to_string()
            ))
        );
    }

    #[test]
    fn test_invalid_temperature_url() {
        let mut args = args();
        args.temperature_url = "not a url".to_string();
        assert!(matches!(
            ScrapeConfig::try_from(args),
            Err(ScrapeConfigError::InvalidUrl { name: "TEMPERATURE_URL", .. })
        ));
    }

    #[test]
    fn test_alert_config_cleans_chat_list() {
        let config = AlertConfig::from(AlertArgs {
            telegram_token: Some(String::new()),
            telegram_chats: vec![" 1234 ".to_string(), String::new(), "5678".to_string()],
            telegram_api_url: "https://api.telegram.org/".to_string(),
        });
        assert_eq!(config.telegram_token, None);
        assert_eq!(config.telegram_chats, vec!["1234", "5678"]);
        assert_eq!(config.telegram_api_url, "https://api.telegram.org");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("soon").is_err());
    }
}
