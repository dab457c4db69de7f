//! Burst/sample timing state machine.
//!
//! A [`SamplingScheduler`] runs on its own thread and owns everything it
//! touches: a copy of the params, the capturer factory, and the sink. The
//! controlling side only keeps the [`StopSignal`] and the join handle, so
//! tearing a profiler down is signal-and-join.
//!
//! Wakeups are computed from absolute targets: sample `k` of a burst is due
//! at `burst_start + k * sampling_interval` and burst `n` at
//! `first_burst + n * burst_interval`. A late wakeup therefore never shifts
//! the slots after it.

use crate::capture::{CapturerFactory, StackCapturer};
use crate::error::Result;
use crate::params::SamplingParams;
use crate::profile::{Profile, ProfileBuilder};
use crate::sink::ProfileSink;
use crate::thread::PlatformThreadId;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between a profiler and its scheduler.
///
/// Waits on it are interruptible: `stop` wakes any waiter immediately.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            *stopped = true;
            self.cond.notify_all();
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep until `deadline` (forever if `None`) or a stop request.
    /// Returns true if stopped.
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    self.cond.wait_until(&mut stopped, deadline);
                }
                None => self.cond.wait(&mut stopped),
            }
        }
        *stopped
    }
}

/// Observable phase of a scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    AwaitingInitialDelay = 1,
    InBurst = 2,
    AwaitingBurstInterval = 3,
    Stopping = 4,
    Stopped = 5,
    Finished = 6,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SchedulerState::AwaitingInitialDelay,
            2 => SchedulerState::InBurst,
            3 => SchedulerState::AwaitingBurstInterval,
            4 => SchedulerState::Stopping,
            5 => SchedulerState::Stopped,
            6 => SchedulerState::Finished,
            _ => SchedulerState::Idle,
        }
    }

    /// The run is over and the sink has been completed
    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Stopped | SchedulerState::Finished)
    }
}

#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> SchedulerState {
        SchedulerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SchedulerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Counters of one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Profiles handed to the sink
    pub profiles: usize,
    /// Samples captured across all profiles
    pub samples: usize,
    /// Sample slots lost to capture errors
    pub skipped: usize,
    /// Skipped slots whose error was not transient
    pub errors: usize,
    /// The run ended because of a stop request
    pub stopped: bool,
    /// No capturer could be created for the target
    pub unavailable: bool,
}

/// Drives a [`StackCapturer`] through the configured bursts.
pub struct SamplingScheduler {
    thread: PlatformThreadId,
    params: SamplingParams,
    factory: Arc<dyn CapturerFactory>,
    sink: ProfileSink,
    stop: Arc<StopSignal>,
    state: Arc<StateCell>,
}

impl SamplingScheduler {
    pub fn new(
        thread: PlatformThreadId,
        params: SamplingParams,
        factory: Arc<dyn CapturerFactory>,
        sink: ProfileSink,
        stop: Arc<StopSignal>,
    ) -> Self {
        SamplingScheduler {
            thread,
            params,
            factory,
            sink,
            stop,
            state: Arc::new(StateCell::default()),
        }
    }

    /// Run on a dedicated, named thread
    pub fn spawn(self) -> Result<SamplingThread> {
        let stop = self.stop.clone();
        let state = self.state.clone();
        let handle = std::thread::Builder::new()
            .name(format!("stackprof-sampler-{}", self.thread))
            .spawn(move || self.run())?;

        Ok(SamplingThread {
            stop,
            state,
            handle: Some(handle),
        })
    }

    /// Execute the whole run on the calling thread
    pub fn run(mut self) -> RunSummary {
        let mut summary = RunSummary::default();

        let Some(mut capturer) = self.factory.create(self.thread) else {
            tracing::warn!(
                "no stack capturer for thread {}, nothing will be collected",
                self.thread
            );
            summary.unavailable = true;
            return self.finish(summary);
        };

        tracing::debug!("sampling thread {}: {}", self.thread, self.params);

        let mut burst_target = Instant::now().checked_add(self.params.initial_delay);
        for burst in 0..self.params.bursts {
            self.state.set(if burst == 0 {
                SchedulerState::AwaitingInitialDelay
            } else {
                SchedulerState::AwaitingBurstInterval
            });

            if self.stop.wait_until(burst_target) {
                summary.stopped = true;
                break;
            }

            self.state.set(SchedulerState::InBurst);
            let (profile, interrupted) = self.record_burst(capturer.as_mut(), &mut summary);
            tracing::debug!(
                "burst {}/{} done: {} samples, {} frames in {:?}",
                burst + 1,
                self.params.bursts,
                profile.samples.len(),
                profile.frame_count(),
                profile.profile_duration
            );
            summary.profiles += 1;
            summary.samples += profile.samples.len();
            self.sink.publish(profile);

            if interrupted {
                summary.stopped = true;
                break;
            }

            // Next burst is due relative to this one's target, not its actual
            // start. An overrun makes the wait return immediately.
            burst_target = burst_target.and_then(|t| t.checked_add(self.params.burst_interval));
        }

        self.finish(summary)
    }

    /// Record one profile. Returns it with whether a stop cut it short.
    fn record_burst(
        &self,
        capturer: &mut dyn StackCapturer,
        summary: &mut RunSummary,
    ) -> (Profile, bool) {
        capturer.profile_recording_starting();
        let mut builder = ProfileBuilder::new(
            self.params.sampling_interval,
            self.params.preserve_sample_ordering,
        );
        let burst_start = builder.started();
        let mut interrupted = false;

        for k in 0..self.params.samples_per_burst {
            let due = slot_deadline(burst_start, self.params.sampling_interval, k);
            if self.stop.wait_until(due) {
                interrupted = true;
                break;
            }

            match capturer.record_stack_sample(builder.modules_mut()) {
                Ok(sample) => builder.push_sample(sample),
                Err(e) if e.is_transient() => {
                    tracing::trace!("sample {} skipped: {}", k, e);
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("sample {} of thread {} failed: {}", k, self.thread, e);
                    summary.skipped += 1;
                    summary.errors += 1;
                }
            }
        }

        capturer.profile_recording_stopped();
        (builder.finish(), interrupted)
    }

    fn finish(self, summary: RunSummary) -> RunSummary {
        if summary.stopped {
            self.state.set(SchedulerState::Stopping);
        }
        self.sink.complete();
        self.state.set(if summary.stopped {
            SchedulerState::Stopped
        } else {
            SchedulerState::Finished
        });
        tracing::debug!(
            "sampling of thread {} ended: {} profiles, {} samples, {} skipped",
            self.thread,
            summary.profiles,
            summary.samples,
            summary.skipped
        );
        summary
    }
}

/// Absolute due time of sample `k`; `None` if it lies beyond the clock's range
fn slot_deadline(burst_start: Instant, interval: Duration, k: u32) -> Option<Instant> {
    burst_start.checked_add(interval.checked_mul(k)?)
}

/// Handle to a scheduler running on its own thread.
///
/// Dropping it before [`join`](Self::join) stops the scheduler and waits for
/// the thread to exit.
pub struct SamplingThread {
    stop: Arc<StopSignal>,
    state: Arc<StateCell>,
    handle: Option<JoinHandle<RunSummary>>,
}

impl SamplingThread {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> SchedulerState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the run to end. Returns its summary the first time.
    pub fn join(&mut self) -> Option<RunSummary> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                tracing::error!("sampling thread panicked");
                None
            }
        }
    }
}

impl Drop for SamplingThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.stop();
            self.join();
        }
    }
}
