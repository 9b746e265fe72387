//! Lifecycle metrics.
//!
//! Workers and the submission path emit [`LifecycleEvent`]s over an unbounded
//! channel; a single aggregator task folds them into counters and a sliding
//! window of processing durations.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAX_SAMPLES: usize = 1024;
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Admitted,
    Started,
    /// An attempt ended and the job was re-queued.
    Retried { elapsed: Duration },
    Completed { elapsed: Duration },
    Failed { elapsed: Duration },
    Cancelled,
    LedgerError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateStats {
    pub admitted: u64,
    pub started: u64,
    pub retried: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub ledger_errors: u64,
    pub average_processing_time_ms: f64,
    pub throughput_per_minute: f64,
}

#[derive(Debug)]
pub struct MetricsAggregator {
    window: Duration,
    samples: VecDeque<(Instant, Duration)>,
    completions: VecDeque<Instant>,
    stats: AggregateStats,
}

impl MetricsAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            completions: VecDeque::new(),
            stats: AggregateStats::default(),
        }
    }

    pub fn apply(&mut self, event: LifecycleEvent, now: Instant) {
        match event {
            LifecycleEvent::Admitted => self.stats.admitted += 1,
            LifecycleEvent::Started => self.stats.started += 1,
            LifecycleEvent::Retried { elapsed } => {
                self.stats.retried += 1;
                self.sample(now, elapsed);
            }
            LifecycleEvent::Completed { elapsed } => {
                self.stats.completed += 1;
                self.completions.push_back(now);
                self.sample(now, elapsed);
            }
            LifecycleEvent::Failed { elapsed } => {
                self.stats.failed += 1;
                self.sample(now, elapsed);
            }
            LifecycleEvent::Cancelled => self.stats.cancelled += 1,
            LifecycleEvent::LedgerError => self.stats.ledger_errors += 1,
        }
        self.evict(now);
    }

    pub fn stats(&self, now: Instant) -> AggregateStats {
        let recent: Vec<Duration> = self
            .samples
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= self.window)
            .map(|(_, elapsed)| *elapsed)
            .collect();
        let average_processing_time_ms = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / recent.len() as f64
        };
        let completions = self
            .completions
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= THROUGHPUT_WINDOW)
            .count();

        AggregateStats {
            average_processing_time_ms,
            throughput_per_minute: completions as f64,
            ..self.stats
        }
    }

    fn sample(&mut self, now: Instant, elapsed: Duration) {
        self.samples.push_back((now, elapsed));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) <= self.window {
                break;
            }
            self.samples.pop_front();
        }
        while let Some(at) = self.completions.front() {
            if now.saturating_duration_since(*at) <= THROUGHPUT_WINDOW {
                break;
            }
            self.completions.pop_front();
        }
    }
}

/// Fire-and-forget sender side of the metrics channel.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl MetricsHandle {
    pub fn record(&self, event: LifecycleEvent) {
        // Receiver gone means the aggregator has shut down.
        let _ = self.tx.send(event);
    }
}

pub fn channel() -> (MetricsHandle, mpsc::UnboundedReceiver<LifecycleEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MetricsHandle { tx }, rx)
}

/// Drain events into the shared aggregator until cancelled.
pub async fn run_aggregator(
    mut rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    aggregator: Arc<RwLock<MetricsAggregator>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => aggregator.write().apply(event, Instant::now()),
                None => break,
            },
        }
    }
    while let Ok(event) = rx.try_recv() {
        aggregator.write().apply(event, Instant::now());
    }
    debug!("metrics: aggregator stopped");
}
