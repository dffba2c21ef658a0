//! Phase timing for scenario runs
//!
//! Uses tokio's clock so timings follow paused time in tests.

use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::models::PhaseTiming;

/// Whole milliseconds, saturating
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Splits a run into consecutive named phases
#[derive(Debug)]
pub struct PhaseClock {
    started: Instant,
    mark: Instant,
    phases: Vec<PhaseTiming>,
}

impl PhaseClock {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            mark: now,
            phases: Vec::new(),
        }
    }

    /// Close the phase running since the previous mark
    pub fn finish(&mut self, name: &str) -> Duration {
        let now = Instant::now();
        let duration = now - self.mark;
        self.mark = now;

        debug!("Phase {} took {}ms", name, as_millis(duration));
        self.phases.push(PhaseTiming {
            name: name.to_string(),
            duration_ms: as_millis(duration),
        });
        duration
    }

    /// Time since the clock started
    pub fn total(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn into_phases(self) -> Vec<PhaseTiming> {
        self.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_phases_are_not_cumulative() {
        let mut clock = PhaseClock::start();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(clock.finish("setup"), Duration::from_secs(2));

        tokio::time::advance(Duration::from_millis(500)).await;
        clock.finish("checks");
        clock.finish("teardown");

        assert_eq!(clock.total(), Duration::from_millis(2500));
        let phases = clock.into_phases();
        let recorded: Vec<(&str, u64)> = phases
            .iter()
            .map(|p| (p.name.as_str(), p.duration_ms))
            .collect();
        assert_eq!(recorded, [("setup", 2000), ("checks", 500), ("teardown", 0)]);
    }

    #[test]
    fn test_as_millis() {
        assert_eq!(as_millis(Duration::from_micros(1999)), 1);
        assert_eq!(as_millis(Duration::MAX), u64::MAX);
    }
}
