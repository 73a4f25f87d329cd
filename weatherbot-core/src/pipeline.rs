//! Single-lane forecast pipeline.
//!
//! Any number of callers may hold a [`ForecastPipeline`] handle. Their requests are
//! drained by one worker task, so the provider never sees more than one call in flight
//! from this process. Each request carries its own reply channel, which ties every
//! answer to the caller that asked for it.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    model::Forecast,
    provider::{ForecastError, ForecastProvider},
};

type Reply = oneshot::Sender<Result<Forecast, ForecastError>>;

struct ForecastJob {
    city: String,
    reply: Reply,
}

/// Handle for submitting forecast requests to the worker.
#[derive(Debug, Clone)]
pub struct ForecastPipeline {
    jobs: mpsc::Sender<ForecastJob>,
}

impl ForecastPipeline {
    /// Start the worker. It stops when `shutdown` fires or every handle is dropped.
    pub fn spawn(
        provider: Arc<dyn ForecastProvider>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, rx) = mpsc::channel(1);
        let worker = tokio::spawn(run_worker(provider, rx, shutdown));

        (Self { jobs }, worker)
    }

    /// Ask for the current forecast of `city`.
    ///
    /// Returns [`ForecastError::Cancelled`] if `cancel` fires before the answer arrives;
    /// the worker then drops the request without affecting other callers.
    pub async fn forecast(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> Result<Forecast, ForecastError> {
        let (reply, answer) = oneshot::channel();
        let job = ForecastJob {
            city: city.to_string(),
            reply,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForecastError::Cancelled),
            sent = self.jobs.send(job) => sent.map_err(|_| ForecastError::Unavailable)?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ForecastError::Cancelled),
            res = answer => res.map_err(|_| ForecastError::Unavailable)?,
        }
    }
}

async fn run_worker(
    provider: Arc<dyn ForecastProvider>,
    mut jobs: mpsc::Receiver<ForecastJob>,
    shutdown: CancellationToken,
) {
    info!("forecast worker started");

    loop {
        let mut job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = jobs.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };

        if job.reply.is_closed() {
            debug!(city = %job.city, "caller gone before the request was served");
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = job.reply.closed() => {
                debug!(city = %job.city, "caller gone, abandoning in-flight request");
                continue;
            }
            result = provider.fetch(&job.city) => result,
        };

        if let Err(err) = &result {
            warn!(city = %job.city, error = %err, "forecast failed");
        }

        if job.reply.send(result).is_err() {
            debug!(city = %job.city, "caller gone before the answer was delivered");
        }
    }

    info!("forecast worker stopped");
}
