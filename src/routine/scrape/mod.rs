pub mod alert;
pub mod error;
pub mod extract_reading;
pub mod fetch_page;
mod finalizer;
pub mod publish_reading;

use tracing::{info, instrument};
use tracing_error::SpanTrace;

use crate::config::scrape::{AlertArgs, AlertConfig, ScrapeArgs, ScrapeConfig};
use crate::error::SpannedExt;
use crate::http::build_client;
use crate::shutdown::Shutdown;

use self::alert::{Notifier, TelegramNotifier};
use self::error::ScrapeError;
use self::extract_reading::{WaterReading, extract_reading};
use self::fetch_page::{HttpPageSource, PageSource};
use self::finalizer::finalizer;
use self::publish_reading::{BackendClient, ReadingSink};

/// One pass of fetch, extract and publish.
pub struct ScrapeRoutineContext {
    page_source: Box<dyn PageSource>,
    reading_sink: Box<dyn ReadingSink>,
}

impl ScrapeRoutineContext {
    pub fn new(page_source: Box<dyn PageSource>, reading_sink: Box<dyn ReadingSink>) -> Self {
        ScrapeRoutineContext {
            page_source,
            reading_sink,
        }
    }

    pub fn from_config(config: &ScrapeConfig, client: reqwest::Client) -> Self {
        Self::new(
            Box::new(HttpPageSource::new(
                client.clone(),
                config.temperature_url.clone(),
            )),
            Box::new(BackendClient::new(
                client,
                config.backend_endpoint.clone(),
                config.api_key.clone(),
            )),
        )
    }

    #[instrument("scrape_routine", skip(self))]
    pub async fn run(&self) -> Result<WaterReading, ScrapeError> {
        info!("Starting scrape...");

        let page = self
            .page_source
            .fetch_page()
            .await
            .with_span_trace()
            .map_err(ScrapeError::FetchPage)?;

        let reading = extract_reading(&page)
            .with_span_trace()
            .map_err(ScrapeError::ExtractReading)?;
        info!("Read {reading}.");

        self.reading_sink
            .publish(&reading)
            .await
            .with_span_trace()
            .map_err(|source| ScrapeError::PublishReading {
                reading: reading.clone(),
                source,
            })?;
        info!("Reading published.");

        Ok(reading)
    }
}

/// Runs the scheduled workload once: every failure is alerted and returned,
/// nothing is retried.
pub async fn scrape(args: ScrapeArgs, alert_args: AlertArgs) -> Result<WaterReading, ScrapeError> {
    let client = build_client(args.http_timeout)
        .with_span_trace()
        .map_err(ScrapeError::HttpClient)?;
    let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(TelegramNotifier::new(
        client.clone(),
        AlertConfig::from(alert_args),
    ))];

    let mut shutdown = Shutdown::new();
    supervise(run_once(args, client), shutdown.signalled(), &notifiers).await
}

/// Races a run against a termination signal; the loser is dropped and the
/// outcome goes through the finalizer either way.
async fn supervise(
    run: impl Future<Output = Result<WaterReading, ScrapeError>>,
    signal: impl Future<Output = &'static str>,
    notifiers: &[Box<dyn Notifier>],
) -> Result<WaterReading, ScrapeError> {
    let result = tokio::select! {
        result = run => result,
        signal = signal => {
            Err(ScrapeError::Interrupted(signal, SpanTrace::capture()))
        }
    };

    finalizer(result, notifiers).await
}

async fn run_once(args: ScrapeArgs, client: reqwest::Client) -> Result<WaterReading, ScrapeError> {
    let config = ScrapeConfig::try_from(args)
        .with_span_trace()
        .map_err(ScrapeError::Config)?;
    ScrapeRoutineContext::from_config(&config, client)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use url::Url;

    use super::alert::NotifyError;
    use super::fetch_page::FetchPageError;
    use super::publish_reading::{PublishError, check_plausible};
    use super::*;

    const PAGE: &str = "<temp>18.4 °C</temp><temp-normal>Letztes Update: 2024-06-01 12:00:00</temp-normal>";

    struct StaticPage(Option<&'static str>);

    #[async_trait]
    impl PageSource for StaticPage {
        async fn fetch_page(&self) -> Result<String, FetchPageError> {
            self.0.map(str::to_string).ok_or_else(|| FetchPageError::Status {
                url: Url::parse("https://www.aare-bern.ch/").unwrap(),
                status: StatusCode::BAD_GATEWAY,
            })
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink(Arc<Mutex<Vec<WaterReading>>>);

    #[async_trait]
    impl ReadingSink for RecordingSink {
        async fn publish(&self, reading: &WaterReading) -> Result<(), PublishError> {
            check_plausible(reading)?;
            self.0.lock().unwrap().push(reading.clone());
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _message: &str) -> Result<(), NotifyError> {
            Err(NotifyError::MissingToken)
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    struct HangingPage;

    #[async_trait]
    impl PageSource for HangingPage {
        async fn fetch_page(&self) -> Result<String, FetchPageError> {
            std::future::pending().await
        }
    }

    fn context(page: Option<&'static str>, sink: &RecordingSink) -> ScrapeRoutineContext {
        ScrapeRoutineContext::new(Box::new(StaticPage(page)), Box::new(sink.clone()))
    }

    #[tokio::test]
    async fn test_run_publishes_reading() {
        let sink = RecordingSink::default();
        let reading = context(Some(PAGE), &sink).run().await.unwrap();
        assert_eq!(reading.temperature, 18.4);
        assert_eq!(*sink.0.lock().unwrap(), vec![reading]);
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_run() {
        let sink = RecordingSink::default();
        let err = context(None, &sink).run().await.unwrap_err();
        assert!(matches!(err, ScrapeError::FetchPage(_)));
        assert!(err.to_string().starts_with("Couldn't retrieve website"));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_freezing_reading_is_not_published() {
        let sink = RecordingSink::default();
        let page = "<temp>-0.3 °C</temp><temp-normal>Letztes Update: 2024-01-10 07:00:00</temp-normal>";
        let err = context(Some(page), &sink).run().await.unwrap_err();
        assert!(matches!(err, ScrapeError::PublishReading { .. }));
        assert!(err.to_string().contains("please approve this manually"));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalizer_alerts_every_notifier_on_failure() {
        let sink = RecordingSink::default();
        let notifier = RecordingNotifier::default();
        let notifiers: Vec<Box<dyn Notifier>> =
            vec![Box::new(BrokenNotifier), Box::new(notifier.clone())];

        let result = context(Some("<html></html>"), &sink).run().await;
        let result = finalizer(result, &notifiers).await;

        assert!(matches!(result, Err(ScrapeError::ExtractReading(_))));
        assert_eq!(
            *notifier.0.lock().unwrap(),
            vec!["Couldn't extract water information: <temp> not found in page".to_string()]
        );
    }

    #[tokio::test]
    async fn test_finalizer_is_quiet_on_success() {
        let sink = RecordingSink::default();
        let notifier = RecordingNotifier::default();
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(notifier.clone())];

        let result = finalizer(context(Some(PAGE), &sink).run().await, &notifiers).await;

        assert!(result.is_ok());
        assert!(notifier.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signal_interrupts_run_and_is_alerted() {
        let sink = RecordingSink::default();
        let notifier = RecordingNotifier::default();
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(notifier.clone())];
        let routine = ScrapeRoutineContext::new(Box::new(HangingPage), Box::new(sink.clone()));

        let result = supervise(routine.run(), async { "SIGTERM" }, &notifiers).await;

        assert!(matches!(result, Err(ScrapeError::Interrupted("SIGTERM", _))));
        assert_eq!(
            *notifier.0.lock().unwrap(),
            vec!["Scrape interrupted by SIGTERM".to_string()]
        );
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_run_wins_over_pending_signal() {
        let sink = RecordingSink::default();
        let notifier = RecordingNotifier::default();
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(notifier.clone())];
        let routine = context(Some(PAGE), &sink);

        let result = supervise(routine.run(), std::future::pending(), &notifiers).await;

        assert_eq!(result.unwrap().temperature, 18.4);
        assert!(notifier.0.lock().unwrap().is_empty());
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_secrets_fail_before_any_request() {
        let args = ScrapeArgs {
            temperature_url: "http://127.0.0.1:9/".to_string(),
            backend_url: "http://127.0.0.1:9".to_string(),
            backend_path: "lake/{}/temperature".to_string(),
            lake_uuid: None,
            api_key: Some("key".to_string()),
            http_timeout: std::time::Duration::from_secs(1),
        };
        let err = run_once(args, reqwest::Client::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "AARE_UUID not defined");
    }
}
