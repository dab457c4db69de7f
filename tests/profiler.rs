mod common;

use common::{fixed_factory, no_capturer, target};
use parking_lot::Mutex;
use stackprof::{PendingProfiles, Profile, SamplingParams, StackSamplingProfiler};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Profiler with a fixed capturer publishing into a private store
fn profiler(params: SamplingParams) -> (StackSamplingProfiler, Arc<PendingProfiles>) {
    let store = Arc::new(PendingProfiles::new());
    let (factory, _calls) = fixed_factory();
    let profiler = StackSamplingProfiler::new(target(), params)
        .with_capturer_factory(factory)
        .with_pending_store(store.clone());
    (profiler, store)
}

fn collect_with_callback(profiler: &mut StackSamplingProfiler) -> Arc<Mutex<Vec<Vec<Profile>>>> {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let d = deliveries.clone();
    profiler.set_custom_completed_callback(move |profiles| d.lock().push(profiles));
    deliveries
}

#[test]
fn test_two_bursts_of_three_samples() {
    let params = SamplingParams {
        initial_delay: Duration::ZERO,
        bursts: 2,
        burst_interval: Duration::from_secs(1),
        samples_per_burst: 3,
        sampling_interval: Duration::from_millis(10),
        preserve_sample_ordering: false,
    };
    let (mut profiler, store) = profiler(params);
    let deliveries = collect_with_callback(&mut profiler);

    let started = Instant::now();
    profiler.start();
    profiler.wait();
    let elapsed = started.elapsed();

    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 1);
    let profiles = &deliveries[0];
    assert_eq!(profiles.len(), 2);
    for profile in profiles {
        assert_eq!(profile.samples.len(), 3);
        assert_eq!(profile.sampling_period, Duration::from_millis(10));
        assert!(profile.profile_duration >= Duration::from_millis(20));
        assert!(profile.profile_duration < Duration::from_millis(500));
        profile.validate().unwrap();
    }
    // Second burst starts one burst_interval after the first
    assert!(elapsed >= Duration::from_secs(1));
    assert!(store.is_empty());
}

#[test]
fn test_profile_count_equals_bursts() {
    for (bursts, samples) in [(1, 1), (3, 2), (4, 0), (0, 5)] {
        let (mut profiler, store) = profiler(SamplingParams {
            bursts,
            burst_interval: Duration::from_millis(2),
            samples_per_burst: samples,
            sampling_interval: Duration::from_millis(1),
            ..Default::default()
        });
        profiler.start();
        let summary = profiler.wait().cloned().unwrap();

        let profiles = store.drain();
        assert_eq!(profiles.len(), bursts as usize);
        assert_eq!(summary.profiles, bursts as usize);
        assert!(!summary.stopped);
        for profile in &profiles {
            assert!(profile.samples.len() <= samples as usize);
        }
    }
}

#[test]
fn test_stop_mid_run_keeps_partial_profile() {
    let (mut profiler, store) = profiler(SamplingParams {
        bursts: 3,
        burst_interval: Duration::from_millis(500),
        samples_per_burst: 100,
        sampling_interval: Duration::from_millis(5),
        ..Default::default()
    });
    profiler.start();
    std::thread::sleep(Duration::from_millis(100));
    profiler.stop();
    let summary = profiler.wait().cloned().unwrap();

    let profiles = store.drain();
    assert!(summary.stopped);
    assert_eq!(profiles.len(), 1);
    assert!(!profiles[0].samples.is_empty());
    assert!(profiles[0].samples.len() < 100);
}

#[test]
fn test_stop_preempts_long_burst_interval() {
    let (mut profiler, _store) = profiler(SamplingParams {
        bursts: 2,
        burst_interval: Duration::from_secs(3600),
        samples_per_burst: 1,
        ..Default::default()
    });
    let deliveries = collect_with_callback(&mut profiler);
    profiler.start();
    std::thread::sleep(Duration::from_millis(50));

    let stopped_at = Instant::now();
    profiler.stop();
    profiler.wait();
    assert!(stopped_at.elapsed() < Duration::from_secs(2));

    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].len(), 1);
}

#[test]
fn test_start_then_immediate_stop() {
    let (mut profiler, _store) = profiler(SamplingParams {
        initial_delay: Duration::from_millis(50),
        bursts: 5,
        ..Default::default()
    });
    let deliveries = collect_with_callback(&mut profiler);

    let started = Instant::now();
    profiler.start();
    profiler.stop();
    drop(profiler);
    assert!(started.elapsed() < Duration::from_secs(2));

    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].len() <= 1);
}

#[test]
fn test_drop_while_sampling_joins_before_returning() {
    let (mut profiler, _store) = profiler(SamplingParams {
        bursts: 10,
        burst_interval: Duration::from_millis(100),
        samples_per_burst: 50,
        sampling_interval: Duration::from_millis(2),
        ..Default::default()
    });
    let deliveries = collect_with_callback(&mut profiler);
    profiler.start();
    std::thread::sleep(Duration::from_millis(30));
    drop(profiler);

    // The callback already ran; nothing fires later
    assert_eq!(deliveries.lock().len(), 1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(deliveries.lock().len(), 1);
}

#[test]
fn test_unavailable_capturer_collects_nothing() {
    let store = Arc::new(PendingProfiles::new());
    let mut profiler = StackSamplingProfiler::new(target(), SamplingParams::default())
        .with_capturer_factory(no_capturer())
        .with_pending_store(store.clone());
    let deliveries = collect_with_callback(&mut profiler);

    profiler.start();
    let summary = profiler.wait().cloned().unwrap();

    assert!(summary.unavailable);
    assert_eq!(summary.profiles, 0);
    assert_eq!(*deliveries.lock(), vec![Vec::<Profile>::new()]);
    assert!(store.is_empty());
}

#[test]
fn test_capturer_called_once_per_slot() {
    let store = Arc::new(PendingProfiles::new());
    let (factory, calls) = fixed_factory();
    let mut profiler = StackSamplingProfiler::new(
        target(),
        SamplingParams {
            bursts: 3,
            burst_interval: Duration::from_millis(5),
            samples_per_burst: 4,
            sampling_interval: Duration::from_millis(1),
            ..Default::default()
        },
    )
    .with_capturer_factory(factory)
    .with_pending_store(store.clone());

    profiler.start();
    profiler.wait();
    assert_eq!(calls.load(Ordering::Relaxed), 12);
    assert_eq!(
        store.drain().iter().map(|p| p.samples.len()).sum::<usize>(),
        12
    );
}
