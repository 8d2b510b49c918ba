use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Below this ceiling (bytes/s) reads are shrunk so the sleeps stay smooth.
pub const LIMIT_BOUND: f64 = 1e5;
pub const DELAY_SLOPE: f64 = 0.1;

const METER_WINDOW: Duration = Duration::from_secs(1);

/// Process-wide throughput budget shared by every fetch issued through one
/// downloader.
#[derive(Debug, Default)]
pub struct SpeedGovernor {
    limit: Option<f64>,
    active: AtomicUsize,
}

impl SpeedGovernor {
    pub fn new(limit: Option<f64>) -> Self {
        Self {
            limit: limit.filter(|l| *l > 0.0),
            active: AtomicUsize::new(0),
        }
    }

    /// Maximum bytes per network read, `None` leaves it to the transport.
    pub fn chunk_size(&self) -> Option<usize> {
        match self.limit {
            Some(limit) if limit < LIMIT_BOUND => Some(((limit * DELAY_SLOPE) as usize).max(1)),
            _ => None,
        }
    }

    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Count a stream as active until the guard is dropped.
    pub fn enter(&self) -> StreamGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        StreamGuard { governor: self }
    }

    /// Sleep needed after `bytes` arrived while the aggregate speed was
    /// `current_speed`, so the ceiling is shared across active streams.
    pub fn delay(&self, bytes: usize, current_speed: f64) -> Duration {
        let Some(limit) = self.limit else {
            return Duration::ZERO;
        };
        if current_speed <= limit {
            return Duration::ZERO;
        }
        let streams = self.active_streams().max(1) as f64;
        let target = bytes as f64 / limit * streams;
        let real = bytes as f64 / current_speed;
        Duration::from_secs_f64((target - real).max(0.0))
    }

    pub async fn throttle(&self, bytes: usize, current_speed: f64) {
        let delay = self.delay(bytes, current_speed);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct StreamGuard<'a> {
    governor: &'a SpeedGovernor,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.governor.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Aggregate throughput over a trailing one second window.
#[derive(Debug, Default)]
pub struct SpeedMeter {
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back((now, bytes));
        Self::prune(&mut samples, now);
    }

    /// Bytes per second.
    pub fn speed(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        Self::prune(&mut samples, now);
        let bytes: u64 = samples.iter().map(|(_, b)| b).sum();
        bytes as f64 / METER_WINDOW.as_secs_f64()
    }

    fn prune(samples: &mut VecDeque<(Instant, u64)>, now: Instant) {
        while let Some((at, _)) = samples.front() {
            if now.duration_since(*at) >= METER_WINDOW {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}
