//! Bounded exponential backoff with cancellation.

use std::future::Future;
use std::time::Duration;

use libcsi::CsiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Outcome of a single poll step.
#[derive(Debug)]
pub enum Poll<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; keep polling.
    Pending,
}

/// Why a [`Backoff::wait`] ended without a result.
#[derive(Debug, Error)]
pub enum WaitError {
    /// Every step was used up without the condition holding.
    #[error("backoff budget exhausted")]
    Exhausted,
    /// The cancellation token fired mid-wait.
    #[error("wait cancelled")]
    Cancelled,
    /// A step reported a terminal failure.
    #[error(transparent)]
    Failed(#[from] CsiError),
}

/// Exponential backoff schedule: `steps` sleeps starting at `initial`, each
/// `factor` times longer than the previous one.
///
/// The step count bounds both the number of polls and the total time spent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    #[serde(with = "duration_ms", rename = "initialMs")]
    pub initial: Duration,
    pub factor: f64,
    pub steps: u32,
}

impl Backoff {
    pub const fn new(initial: Duration, factor: f64, steps: u32) -> Self {
        Self {
            initial,
            factor,
            steps,
        }
    }

    /// The successive sleep intervals.  Saturates at [`Duration::MAX`].
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + use<> {
        let factor = self.factor;
        (0..self.steps).scan(self.initial, move |next, _| {
            let current = *next;
            *next = Duration::try_from_secs_f64(next.as_secs_f64() * factor)
                .unwrap_or(Duration::MAX);
            Some(current)
        })
    }

    /// Total time the schedule sleeps if every step is used.
    pub fn budget(&self) -> Duration {
        self.intervals().fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Sleep, then run `check`, once per step until it returns
    /// [`Poll::Ready`] or fails.
    ///
    /// Cancellation of `cancel` is observed during every sleep.
    pub async fn wait<T, F, Fut>(&self, cancel: &CancellationToken, mut check: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Poll<T>, CsiError>>,
    {
        for delay in self.intervals() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if let Poll::Ready(value) = check().await? {
                return Ok(value);
            }
        }
        Err(WaitError::Exhausted)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
