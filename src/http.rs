use std::time::Duration;

/// User-Agent sent with every request, e.g. `aare_scraper/0.1.0`
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builds the HTTP client shared by every step of a run.
///
/// One client per process run: the job exits after a single scrape, so there is
/// no pool worth keeping beyond it.
///
/// # Features
/// - **Timeouts**: `timeout` for whole requests, at most 10s to connect
/// - **Security**: Rustls for TLS (no OpenSSL in the image)
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(USER_AGENT)
        .use_rustls_tls()
        .build()
}
