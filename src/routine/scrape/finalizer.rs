use tracing::{error, info, instrument};

use super::alert::{Notifier, alert_all};
use super::error::ScrapeError;
use super::extract_reading::WaterReading;

/// Reports the outcome of a run; failures are alerted before being handed back.
#[instrument("finalizer", skip_all)]
pub(crate) async fn finalizer(
    result: Result<WaterReading, ScrapeError>,
    notifiers: &[Box<dyn Notifier>],
) -> Result<WaterReading, ScrapeError> {
    match &result {
        Ok(reading) => info!("Scrape completed successfully ({reading})."),
        Err(e) => {
            error!("Something went wrong ({e})");
            alert_all(notifiers, &e.to_string()).await;
        }
    }
    result
}
