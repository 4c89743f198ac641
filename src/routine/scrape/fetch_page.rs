use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, instrument, trace};
use url::Url;

#[derive(Error, Debug)]
pub enum FetchPageError {
    #[error("request to {url} failed: {source}")]
    Request { url: Url, source: reqwest::Error },

    #[error("{url} answered with status {status}")]
    Status { url: Url, status: StatusCode },

    #[error("{url} returned a body that is not valid UTF-8")]
    Encoding { url: Url },
}

/// Where the temperature page comes from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self) -> Result<String, FetchPageError>;
}

pub struct HttpPageSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    #[instrument("fetch_page", skip(self), fields(url = %self.url))]
    async fn fetch_page(&self) -> Result<String, FetchPageError> {
        debug!("Requesting {}", self.url);
        let request_error = |source| FetchPageError::Request {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchPageError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let bytes = response.bytes().await.map_err(request_error)?;
        let content = String::from_utf8(bytes.to_vec()).map_err(|_| FetchPageError::Encoding {
            url: self.url.clone(),
        })?;
        trace!("{content}");
        Ok(content)
    }
}
