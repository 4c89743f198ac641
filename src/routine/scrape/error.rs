use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use super::extract_reading::{ExtractError, WaterReading};
use super::fetch_page::FetchPageError;
use super::publish_reading::PublishError;
use crate::config::scrape::ScrapeConfigError;
use crate::error::SpannedErr;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("{0}")]
    Config(SpannedErr<ScrapeConfigError>),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(SpannedErr<reqwest::Error>),

    #[error("Couldn't retrieve website: {0}")]
    FetchPage(SpannedErr<FetchPageError>),

    #[error("Couldn't extract water information: {0}")]
    ExtractReading(SpannedErr<ExtractError>),

    #[error("Failed to put data ({reading}) to backend: {source}")]
    PublishReading {
        reading: WaterReading,
        source: SpannedErr<PublishError>,
    },

    #[error("Scrape interrupted by {0}")]
    Interrupted(&'static str, SpanTrace),
}

impl ExtractSpanTrace for ScrapeError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            ScrapeError::Config(e) => e.span_trace(),
            ScrapeError::HttpClient(e) => e.span_trace(),
            ScrapeError::FetchPage(e) => e.span_trace(),
            ScrapeError::ExtractReading(e) => e.span_trace(),
            ScrapeError::PublishReading { source, .. } => source.span_trace(),
            ScrapeError::Interrupted(_, span_trace) => Some(span_trace),
        }
    }
}
