//! Periodic drift monitoring.
//!
//! The monitor re-derives the observed schema by sampling the collection on
//! every tick and classifies it against a fixed expected schema. It never
//! tails a change stream. Each report can also be POSTed as JSON to a
//! webhook; delivery failures are logged and the monitor keeps running.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::analysis::{Synthesizer, SynthesizerConfig};
use crate::error::Error;
use crate::migration::{DriftClassifier, DriftLevel, DriftReport};
use crate::schema::SchemaDocument;
use crate::store::DocumentStore;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between checks.
    pub interval: Duration,
    /// Stop after this many checks; `None` runs until the future is dropped.
    pub max_runs: Option<usize>,
    /// Sampling limits for each check.
    pub synthesizer: SynthesizerConfig,
    /// URL that receives every report as a JSON POST.
    pub webhook: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_runs: None,
            synthesizer: SynthesizerConfig::default(),
            webhook: None,
        }
    }
}

impl MonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_runs(mut self, runs: usize) -> Self {
        self.max_runs = Some(runs);
        self
    }

    /// Check once and return.
    pub fn once(self) -> Self {
        self.with_max_runs(1)
    }

    pub fn with_synthesizer(mut self, config: SynthesizerConfig) -> Self {
        self.synthesizer = config;
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }
}

/// POSTs drift reports to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Per-request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Use a preconfigured client, for proxies or custom TLS roots.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one report. Non-success status codes are errors.
    pub async fn deliver(&self, report: &DriftReport) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .timeout(Self::TIMEOUT)
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Compares live data against an expected schema on an interval.
pub struct DriftMonitor {
    expected: SchemaDocument,
    synthesizer: Synthesizer,
    webhook: Option<WebhookNotifier>,
    config: MonitorConfig,
}

impl DriftMonitor {
    pub fn new(expected: SchemaDocument, config: MonitorConfig) -> Self {
        Self {
            expected,
            synthesizer: Synthesizer::new(config.synthesizer.clone()),
            webhook: config.webhook.as_deref().map(WebhookNotifier::new),
            config,
        }
    }

    /// Replace the webhook built from the config.
    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.webhook = Some(notifier);
        self
    }

    pub fn expected(&self) -> &SchemaDocument {
        &self.expected
    }

    /// Sample once and classify drift.
    pub async fn check<S>(&self, store: &S) -> Result<DriftReport, Error>
    where
        S: DocumentStore + ?Sized,
    {
        let observed = self.synthesizer.analyze(store).await?;
        Ok(DriftClassifier::classify(&self.expected, &observed.schema))
    }

    /// Check on every tick and hand each report to `sink` and the webhook.
    ///
    /// The first check runs immediately. Returns the last report once
    /// `max_runs` checks have completed.
    #[instrument(skip_all, fields(collection = store.name()))]
    pub async fn run<S, F>(&self, store: &S, mut sink: F) -> Result<DriftReport, Error>
    where
        S: DocumentStore + ?Sized,
        F: FnMut(&DriftReport),
    {
        info!(interval_secs = self.config.interval.as_secs(), "Drift monitor started");

        let mut ticker = tokio::time::interval(self.config.interval);
        let mut runs = 0usize;

        let last = loop {
            ticker.tick().await;

            let report = self.check(store).await?;
            runs += 1;

            match report.max_level() {
                Some(DriftLevel::Critical) => warn!(
                    run = runs,
                    drift_score = report.drift_score,
                    critical = report.critical_count,
                    "Critical drift detected"
                ),
                _ => info!(
                    run = runs,
                    drift_score = report.drift_score,
                    has_drift = report.has_drift,
                    "Drift check complete"
                ),
            }

            sink(&report);
            self.notify(&report).await;

            if self.config.max_runs.is_some_and(|max| runs >= max) {
                break report;
            }
        };

        info!(runs, "Drift monitor stopped");
        Ok(last)
    }

    /// Deliver to the webhook, if any. Failures are logged only.
    async fn notify(&self, report: &DriftReport) {
        let Some(webhook) = &self.webhook else {
            return;
        };
        match webhook.deliver(report).await {
            Ok(()) => debug!(url = webhook.url(), "Drift report delivered"),
            Err(e) => warn!(url = webhook.url(), error = %e, "Webhook delivery failed"),
        }
    }
}
