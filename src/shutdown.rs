use futures::future;
use tokio::select;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::{info, warn};

/// Resolves once the process receives SIGINT or SIGTERM.
///
/// Kubernetes sends SIGTERM when a Job is deleted or hits its active deadline.
pub struct Shutdown {
    rx: watch::Receiver<Option<&'static str>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            rx: spawn_shutdown_listener(),
        }
    }

    /// Waits for a signal and returns its name.
    pub async fn signalled(&mut self) -> &'static str {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                // listener gave up without a signal
                return future::pending().await;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_shutdown_listener() -> watch::Receiver<Option<&'static str>> {
    let (tx, rx) = watch::channel(None);

    tokio::spawn(async move {
        if let Some(signal) = next_signal().await {
            info!("Received {signal}.");
            let _ = tx.send(Some(signal));
        }
    });

    rx
}

/// `None` once no signal can be listened for anymore.
async fn next_signal() -> Option<&'static str> {
    let mut sigterm = signal::unix::signal(SignalKind::terminate())
        .inspect_err(|e| warn!("Failed to listen for SIGTERM: {e}"))
        .ok();

    let term = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => future::pending::<()>().await,
        }
    };

    select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => Some("SIGINT"),
            Err(e) => {
                warn!("Failed to listen for SIGINT: {e}");
                None
            }
        },
        _ = term => Some("SIGTERM"),
    }
}
