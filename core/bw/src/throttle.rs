//! Fixed-delay pacing for sequential requests.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Spaces requests at least `delay` apart.
///
/// The delay is measured from the end of one request to the start of the
/// next; the first request is never delayed.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_finished: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_finished: None,
        }
    }

    /// Create a throttle with a delay in milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `request` once the delay since the previous request has elapsed.
    pub async fn run<F, T>(&mut self, request: F) -> T
    where
        F: Future<Output = T>,
    {
        if let Some(last) = self.last_finished {
            let next = last + self.delay;
            if next > Instant::now() {
                debug!("Waiting {:?} before next request", next - Instant::now());
                sleep_until(next).await;
            }
        }
        let result = request.await;
        self.last_finished = Some(Instant::now());
        result
    }
}
