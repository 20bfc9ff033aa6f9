//! Latency measurement for observations

use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("resync t1");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
