use std::{future::Future, sync::Arc};

use common::Report;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::error::ReportError;

/// Something that accepts readings on behalf of the remote collector.
pub trait Reporter: Send + Sync + 'static {
    /// Deliver one reading. Fails on transport errors and non-success
    /// responses.
    fn report(&self, report: Report) -> impl Future<Output = Result<(), ReportError>> + Send;
}

/// Posts readings to the collector over HTTP.
pub struct HttpReporter {
    client: reqwest::Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Reporter for HttpReporter {
    async fn report(&self, report: Report) -> Result<(), ReportError> {
        let reading = report.reading.to_string();
        let response = self
            .client
            .post(&self.url)
            .query(&[("device", report.device.as_str()), ("reading", reading.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ReportError::Status(response.status()));
        }

        Ok(())
    }
}

/// Fire-and-forget delivery. Failures are logged and dropped; the next good
/// sensor cycle sends a fresh report.
pub fn spawn_report<R: Reporter>(reporter: Arc<R>, report: Report) -> JoinHandle<()> {
    tokio::spawn(async move {
        let device = report.device.clone();
        let reading = report.reading;

        match reporter.report(report).await {
            Ok(()) => debug!("Report: sent {} for {}", reading, device),
            Err(e) => warn!("Report: dropped {} for {}: {}", reading, device, e),
        }
    })
}
