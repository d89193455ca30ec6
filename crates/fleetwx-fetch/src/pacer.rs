//! Request pacing
//!
//! [`ThrottledFetcher`] owns a FIFO queue consumed by a single dispatch task.
//! The dispatch task starts at most one upstream request per interval,
//! `ceil(60s / requests_per_minute)`, so any 60 second window holds at most
//! `requests_per_minute` dispatches. Requests are spawned rather than awaited
//! so a slow upstream never stalls the cadence.

use crate::{normalize, FetchError, FetchResult, WeatherProvider};
use fleetwx_core::{Coordinate, WeatherSnapshot};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    /// Dispatch ceiling; kept below the upstream quota
    pub requests_per_minute: u32,
    /// Per-request deadline, after which the task resolves as unavailable
    pub request_timeout: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 55,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PacerConfig {
    /// Minimum spacing between two dispatches, rounded up to the nanosecond
    pub fn interval(&self) -> Duration {
        let per_minute = u64::from(self.requests_per_minute.max(1));
        Duration::from_nanos(60_000_000_000u64.div_ceil(per_minute))
    }

    fn validate(&self) -> FetchResult<()> {
        if self.requests_per_minute == 0 {
            return Err(FetchError::InvalidConfiguration(
                "requests_per_minute must be positive".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(FetchError::InvalidConfiguration(
                "request_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A queued request
#[derive(Debug)]
pub struct FetchTask {
    pub coordinate: Coordinate,
    pub enqueued_at: Instant,
    responder: oneshot::Sender<FetchResult<WeatherSnapshot>>,
}

/// Result of a submitted request, resolved once the task is dispatched
#[derive(Debug)]
pub struct PendingFetch {
    rx: oneshot::Receiver<FetchResult<WeatherSnapshot>>,
}

impl Future for PendingFetch {
    type Output = FetchResult<WeatherSnapshot>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(FetchError::PipelineClosed)))
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<FetchTask>,
    queued: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    provider_name: String,
    config: PacerConfig,
}

/// Cloneable handle to a rate-limited fetch pipeline.
///
/// Dropping every handle, or calling [`ThrottledFetcher::shutdown`], stops
/// dispatching; tasks still queued resolve with [`FetchError::PipelineClosed`].
#[derive(Clone)]
pub struct ThrottledFetcher {
    inner: Arc<Inner>,
}

impl ThrottledFetcher {
    /// Start the dispatch task on the current tokio runtime
    pub fn spawn(provider: Arc<dyn WeatherProvider>, config: PacerConfig) -> FetchResult<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let queued = Arc::new(AtomicUsize::new(0));

        info!(
            provider = provider.name(),
            requests_per_minute = config.requests_per_minute,
            interval_ms = config.interval().as_millis() as u64,
            "Starting weather fetch pipeline"
        );

        let provider_name = provider.name().to_string();
        tokio::spawn(dispatch_loop(
            provider,
            config.clone(),
            rx,
            shutdown_rx,
            queued.clone(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                queued,
                shutdown,
                provider_name,
                config,
            }),
        })
    }

    /// Number of tasks waiting for a dispatch slot
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Validate and enqueue a request without waiting for it
    pub fn submit(&self, coordinate: Coordinate) -> FetchResult<PendingFetch> {
        let coordinate = Coordinate::new(coordinate.latitude, coordinate.longitude)?;
        if *self.inner.shutdown.borrow() {
            return Err(FetchError::PipelineClosed);
        }

        let (responder, rx) = oneshot::channel();
        let task = FetchTask {
            coordinate,
            enqueued_at: Instant::now(),
            responder,
        };
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(task).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(FetchError::PipelineClosed);
        }
        Ok(PendingFetch { rx })
    }

    /// Fetch weather for one location, waiting for a dispatch slot
    pub async fn fetch_weather(&self, latitude: f64, longitude: f64) -> FetchResult<WeatherSnapshot> {
        let coordinate = Coordinate::new(latitude, longitude)?;
        self.submit(coordinate)?.await
    }

    /// Fetch many locations; one result per input, in input order
    pub async fn fetch_weather_batch(
        &self,
        coordinates: &[(f64, f64)],
    ) -> Vec<FetchResult<WeatherSnapshot>> {
        let pending: Vec<FetchResult<PendingFetch>> = coordinates
            .iter()
            .map(|&(lat, lon)| {
                Coordinate::new(lat, lon)
                    .map_err(FetchError::from)
                    .and_then(|c| self.submit(c))
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for p in pending {
            results.push(match p {
                Ok(p) => p.await,
                Err(e) => Err(e),
            });
        }
        results
    }

    /// Stop dispatching. Queued tasks resolve with `PipelineClosed`;
    /// requests already in flight complete normally.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for ThrottledFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledFetcher")
            .field("provider", &self.inner.provider_name)
            .field("config", &self.inner.config)
            .field("queued", &self.queued())
            .finish()
    }
}

async fn dispatch_loop(
    provider: Arc<dyn WeatherProvider>,
    config: PacerConfig,
    mut rx: mpsc::UnboundedReceiver<FetchTask>,
    mut shutdown: watch::Receiver<bool>,
    queued: Arc<AtomicUsize>,
) {
    let interval = config.interval();
    let mut next_slot: Option<Instant> = None;

    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        if let Some(slot) = next_slot {
            if Instant::now() < slot {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        let _ = task.responder.send(Err(FetchError::PipelineClosed));
                        break;
                    }
                    _ = sleep_until(slot) => {}
                }
            }
        }

        // abandoned tasks do not consume a slot
        if task.responder.is_closed() {
            debug!(coordinate = %task.coordinate, "Skipping abandoned fetch");
            continue;
        }

        next_slot = Some(Instant::now() + interval);
        tokio::spawn(dispatch(provider.clone(), task, config.clone()));
    }

    rx.close();
    let mut rejected = 0usize;
    while let Ok(task) = rx.try_recv() {
        queued.fetch_sub(1, Ordering::SeqCst);
        let _ = task.responder.send(Err(FetchError::PipelineClosed));
        rejected += 1;
    }
    info!(rejected, "Weather fetch pipeline stopped");
}

async fn dispatch(provider: Arc<dyn WeatherProvider>, task: FetchTask, config: PacerConfig) {
    let FetchTask {
        coordinate,
        enqueued_at,
        responder,
    } = task;
    let waited_ms = enqueued_at.elapsed().as_millis() as u64;

    let result = match tokio::time::timeout(config.request_timeout, provider.fetch(coordinate)).await {
        Ok(Ok(raw)) => Ok(normalize(raw)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(FetchError::UpstreamUnavailable {
            coordinate,
            reason: format!("timed out after {:?}", config.request_timeout),
        }),
    };

    log_outcome(coordinate, waited_ms, &config, &result);

    // the caller may have stopped listening
    let _ = responder.send(result);
}

fn log_outcome(
    coordinate: Coordinate,
    waited_ms: u64,
    config: &PacerConfig,
    result: &FetchResult<WeatherSnapshot>,
) {
    match result {
        Ok(snapshot) => debug!(
            %coordinate,
            waited_ms,
            temperature_k = snapshot.temperature_k,
            "Fetched weather"
        ),
        Err(FetchError::UpstreamRateLimited { .. }) => warn!(
            %coordinate,
            requests_per_minute = config.requests_per_minute,
            "Upstream rate limited a paced request; the requests_per_minute ceiling is miscalibrated"
        ),
        Err(e @ FetchError::MalformedResponse { raw, .. }) => warn!(
            %coordinate,
            waited_ms,
            error = %e,
            raw = %raw,
            "Weather fetch returned an unreadable body"
        ),
        Err(e) => warn!(%coordinate, waited_ms, error = %e, "Weather fetch failed"),
    }
}
