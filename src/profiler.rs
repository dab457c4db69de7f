//! User-facing profiler handle.
//!
//! ```no_run
//! use stackprof::{PlatformThreadId, SamplingParams, StackSamplingProfiler};
//! use std::time::Duration;
//!
//! let params = SamplingParams {
//!     samples_per_burst: 50,
//!     sampling_interval: Duration::from_millis(10),
//!     ..Default::default()
//! };
//! let mut profiler = StackSamplingProfiler::new(PlatformThreadId::current(), params);
//! profiler.set_custom_completed_callback(|profiles| {
//!     println!("collected {} profile(s)", profiles.len());
//! });
//! profiler.start();
//! // ... work on the target thread ...
//! profiler.stop(); // optional: ends collection before all bursts are done
//! ```
//!
//! Without a custom callback, profiles accumulate in the process-wide
//! [`PendingProfiles`] store and are harvested with
//! [`StackSamplingProfiler::get_pending_profiles`]. That function is reserved
//! for the single aggregator of the process; everyone else should install a
//! callback.

use crate::capture::{CapturerFactory, NativeCapturerFactory};
use crate::params::SamplingParams;
use crate::profile::Profile;
use crate::scheduler::{
    RunSummary, SamplingScheduler, SamplingThread, SchedulerState, StopSignal,
};
use crate::sink::{CompletedCallback, PendingProfiles, ProfileSink};
use crate::thread::PlatformThreadId;
use std::sync::Arc;

/// Periodically samples the stack of one thread.
///
/// Sampling runs on a dedicated thread between [`start`](Self::start) and
/// the end of the last burst (or [`stop`](Self::stop)). Dropping the
/// profiler stops sampling and waits for that thread to exit, so no
/// callback can run after the profiler is gone.
pub struct StackSamplingProfiler {
    thread: PlatformThreadId,
    params: SamplingParams,
    factory: Arc<dyn CapturerFactory>,
    store: Arc<PendingProfiles>,
    custom_completed_callback: Option<CompletedCallback>,
    stop_signal: Arc<StopSignal>,
    sampling_thread: Option<SamplingThread>,
    summary: Option<RunSummary>,
    started: bool,
}

/// Cloneable handle that stops a profiler from any thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    signal: Arc<StopSignal>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.signal.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }
}

impl StackSamplingProfiler {
    /// Profiler for `thread` using the native capture backend and the
    /// process-wide pending store
    pub fn new(thread: PlatformThreadId, params: SamplingParams) -> Self {
        StackSamplingProfiler {
            thread,
            params,
            factory: Arc::new(NativeCapturerFactory),
            store: PendingProfiles::global(),
            custom_completed_callback: None,
            stop_signal: Arc::new(StopSignal::new()),
            sampling_thread: None,
            summary: None,
            started: false,
        }
    }

    /// Replace the capture backend
    pub fn with_capturer_factory(mut self, factory: Arc<dyn CapturerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Publish into `store` instead of the process-wide store
    pub fn with_pending_store(mut self, store: Arc<PendingProfiles>) -> Self {
        self.store = store;
        self
    }

    pub fn thread(&self) -> PlatformThreadId {
        self.thread
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Deliver the run's profiles to `callback` instead of the pending store.
    ///
    /// The callback runs once, on the sampling thread, after all bursts
    /// completed or the profiler was stopped.
    ///
    /// # Panics
    ///
    /// Must be called before [`start`](Self::start); panics otherwise.
    pub fn set_custom_completed_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(Vec<Profile>) + Send + 'static,
    {
        assert!(
            !self.started,
            "set_custom_completed_callback called after start"
        );
        self.custom_completed_callback = Some(Box::new(callback));
    }

    /// Begin sampling on a dedicated thread.
    ///
    /// A thread that cannot be sampled (unsupported platform, unknown thread)
    /// yields a run that collects nothing.
    ///
    /// # Panics
    ///
    /// Panics if called more than once, or if the sampling thread cannot be
    /// spawned.
    pub fn start(&mut self) {
        assert!(!self.started, "StackSamplingProfiler::start called twice");
        self.started = true;

        let sink = match self.custom_completed_callback.take() {
            Some(callback) => ProfileSink::custom(callback),
            None => ProfileSink::pending(self.store.clone()),
        };

        let scheduler = SamplingScheduler::new(
            self.thread,
            self.params.clone(),
            self.factory.clone(),
            sink,
            self.stop_signal.clone(),
        );

        match scheduler.spawn() {
            Ok(sampling_thread) => self.sampling_thread = Some(sampling_thread),
            Err(e) => panic!("failed to spawn sampling thread: {}", e),
        }
    }

    /// Request that sampling ends. Returns without waiting.
    ///
    /// A burst in progress is cut short and delivered with the samples it
    /// has. Safe to call any number of times, also before `start`.
    pub fn stop(&self) {
        self.stop_signal.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signal: self.stop_signal.clone(),
        }
    }

    /// Block until the sampling thread exited. Returns the run's counters,
    /// or `None` if the profiler was never started.
    pub fn wait(&mut self) -> Option<&RunSummary> {
        if let Some(mut sampling_thread) = self.sampling_thread.take() {
            self.summary = sampling_thread.join();
        }
        self.summary.as_ref()
    }

    /// Sampling thread is running (started and not yet exited)
    pub fn is_running(&self) -> bool {
        self.sampling_thread
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn state(&self) -> SchedulerState {
        match &self.sampling_thread {
            Some(t) => t.state(),
            None if self.summary.as_ref().is_some_and(|s| s.stopped) => SchedulerState::Stopped,
            None if self.started => SchedulerState::Finished,
            None => SchedulerState::Idle,
        }
    }

    /// Drain the process-wide pending store.
    ///
    /// Reserved for the one aggregator of the process. Code that wants the
    /// profiles of its own profiler should use
    /// [`set_custom_completed_callback`](Self::set_custom_completed_callback).
    pub fn get_pending_profiles() -> Vec<Profile> {
        PendingProfiles::global().drain()
    }
}

impl Drop for StackSamplingProfiler {
    fn drop(&mut self) {
        if let Some(mut sampling_thread) = self.sampling_thread.take() {
            sampling_thread.stop();
            sampling_thread.join();
        }
    }
}

impl std::fmt::Debug for StackSamplingProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackSamplingProfiler")
            .field("thread", &self.thread)
            .field("params", &self.params)
            .field("started", &self.started)
            .field("custom_callback", &self.custom_completed_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StackCapturer;
    use crate::error::Result;
    use crate::profile::{Frame, ModuleTable, Sample};
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    struct ConstCapturer;

    impl StackCapturer for ConstCapturer {
        fn profile_recording_starting(&mut self) {}

        fn record_stack_sample(&mut self, _modules: &mut ModuleTable) -> Result<Sample> {
            Ok(vec![Frame::unresolved(0xabc)])
        }

        fn profile_recording_stopped(&mut self) {}
    }

    fn const_factory() -> Arc<dyn CapturerFactory> {
        Arc::new(|_thread: PlatformThreadId| {
            Some(Box::new(ConstCapturer) as Box<dyn StackCapturer>)
        })
    }

    fn profiler(params: SamplingParams) -> (StackSamplingProfiler, Arc<PendingProfiles>) {
        let store = Arc::new(PendingProfiles::new());
        let profiler = StackSamplingProfiler::new(PlatformThreadId::from_raw(7), params)
            .with_capturer_factory(const_factory())
            .with_pending_store(store.clone());
        (profiler, store)
    }

    fn quick_params() -> SamplingParams {
        SamplingParams {
            bursts: 2,
            samples_per_burst: 3,
            sampling_interval: Duration::from_millis(1),
            burst_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let (mut profiler, store) = profiler(quick_params());
        assert_eq!(profiler.state(), SchedulerState::Idle);
        assert!(profiler.wait().is_none());

        profiler.start();
        let summary = profiler.wait().cloned().unwrap();
        assert_eq!(summary.profiles, 2);
        assert!(!profiler.is_running());
        assert_eq!(profiler.state(), SchedulerState::Finished);
        assert_eq!(store.drain().len(), 2);
    }

    #[test]
    fn test_completed_run_is_not_stopped() {
        let (mut profiler, _store) = profiler(quick_params());
        let handle = profiler.stop_handle();
        profiler.start();
        let summary = profiler.wait().cloned().unwrap();

        assert!(!summary.stopped);
        assert!(!handle.is_stopped());
        assert_eq!(profiler.state(), SchedulerState::Finished);

        drop(profiler);
        assert!(!handle.is_stopped());
    }

    #[test]
    fn test_callback_bypasses_store() {
        let (mut profiler, store) = profiler(quick_params());
        let got = Arc::new(Mutex::new(None));
        let g = got.clone();
        profiler.set_custom_completed_callback(move |profiles| {
            *g.lock() = Some(profiles.len());
        });
        profiler.start();
        profiler.wait();

        assert_eq!(*got.lock(), Some(2));
        assert!(store.is_empty());
    }

    #[test]
    fn test_stop_handle_from_other_thread() {
        let (mut profiler, store) = profiler(SamplingParams {
            bursts: 5,
            burst_interval: Duration::from_secs(60),
            samples_per_burst: 1,
            ..Default::default()
        });
        profiler.start();
        let handle = profiler.stop_handle();
        std::thread::spawn(move || handle.stop()).join().unwrap();

        let started = Instant::now();
        let summary = profiler.wait().cloned().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(summary.stopped);
        assert!(store.len() <= 1);
        assert_eq!(profiler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_stop_before_start() {
        let (mut profiler, store) = profiler(quick_params());
        profiler.stop();
        profiler.stop();
        profiler.start();
        let summary = profiler.wait().cloned().unwrap();
        assert_eq!(summary.profiles, 0);
        assert!(store.is_empty());
    }

    #[test]
    #[should_panic(expected = "start called twice")]
    fn test_double_start_panics() {
        let (mut profiler, _store) = profiler(quick_params());
        profiler.start();
        profiler.start();
    }

    #[test]
    #[should_panic(expected = "after start")]
    fn test_callback_after_start_panics() {
        let (mut profiler, _store) = profiler(quick_params());
        profiler.start();
        profiler.set_custom_completed_callback(|_| {});
    }

    #[test]
    fn test_drop_never_started() {
        let (profiler, store) = profiler(quick_params());
        drop(profiler);
        assert!(store.is_empty());
    }
}
