use std::fmt;
use std::time::Duration;

/// Timing configuration of a sampling run.
///
/// A run is `bursts` bursts, each producing one profile of up to
/// `samples_per_burst` samples taken `sampling_interval` apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingParams {
    /// Delay before the first sample of the first burst
    pub initial_delay: Duration,
    /// Number of bursts (profiles) to collect
    pub bursts: u32,
    /// Desired time from the start of one burst to the start of the next
    pub burst_interval: Duration,
    /// Number of samples per burst
    pub samples_per_burst: u32,
    /// Desired time between samples within a burst
    pub sampling_interval: Duration,
    /// Mark profiles as order-sensitive for downstream consumers
    pub preserve_sample_ordering: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams {
            initial_delay: Duration::ZERO,
            bursts: 1,
            burst_interval: Duration::from_secs(10),
            samples_per_burst: 300,
            sampling_interval: Duration::from_millis(100),
            preserve_sample_ordering: false,
        }
    }
}

impl SamplingParams {
    /// Nominal wall time of an uninterrupted run: initial delay, the gaps
    /// between burst starts, and the sampling span of the last burst.
    /// `None` if it does not fit in a `Duration`.
    pub fn nominal_duration(&self) -> Option<Duration> {
        if self.bursts == 0 {
            return Some(self.initial_delay);
        }
        let last_burst = self
            .sampling_interval
            .checked_mul(self.samples_per_burst.saturating_sub(1))?;
        let gaps = self.burst_interval.checked_mul(self.bursts - 1)?;
        self.initial_delay.checked_add(gaps)?.checked_add(last_burst)
    }
}

impl fmt::Display for SamplingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} burst(s) x {} sample(s) every {}, bursts every {}, initial delay {}",
            self.bursts,
            self.samples_per_burst,
            humantime::format_duration(self.sampling_interval),
            humantime::format_duration(self.burst_interval),
            humantime::format_duration(self.initial_delay),
        )
    }
}
