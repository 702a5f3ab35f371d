// Membership Change Notification
//
// Downstream consumers re-read the membership list whenever it changes. The
// view invokes the `ChangeSink` under its lock after every structural
// mutation, so implementations must return immediately; `HttpChangeSink`
// hands the actual request to a spawned task.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Observer of membership mutations.
pub trait ChangeSink: Send + Sync {
    fn on_membership_changed(&self);
}

/// Fire-and-forget HTTP GET against the configured downstream hook.
pub struct HttpChangeSink {
    client: reqwest::Client,
    url: String,
}

impl HttpChangeSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl ChangeSink for HttpChangeSink {
    fn on_membership_changed(&self) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = client.get(&url).send().await {
                // The downstream may simply not be running; that is its
                // problem, not the membership protocol's.
                tracing::debug!(url = %url, error = %e, "membership hook unreachable");
            }
        });
    }
}

/// Sink that ignores every notification. For tests and standalone runs.
#[derive(Default)]
pub struct NullChangeSink;

impl ChangeSink for NullChangeSink {
    fn on_membership_changed(&self) {}
}

/// Sink that counts notifications. Test helper.
#[derive(Default)]
pub struct CountingChangeSink {
    count: AtomicUsize,
}

impl CountingChangeSink {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ChangeSink for CountingChangeSink {
    fn on_membership_changed(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
