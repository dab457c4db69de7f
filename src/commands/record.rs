//! In-process recording of a synthetic workload.
//!
//! The recorder is the designated aggregator of its process: it is the only
//! code that drains the process-wide pending store.

use crate::cli::Workload;
use crate::error::{Error, Result};
use crate::params::SamplingParams;
use crate::profiler::{StackSamplingProfiler, StopHandle};
use crate::scheduler::RunSummary;
use crate::storage::Storage;
use crate::thread::PlatformThreadId;
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Outcome of a recording
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub output: PathBuf,
    pub run: RunSummary,
    /// Profiles written to the database
    pub written: usize,
    pub samples: u64,
}

/// Profiles a workload thread and writes the drained profiles to SQLite.
pub struct Recorder {
    output: PathBuf,
    storage: Storage,
    workload: WorkloadThread,
    profiler: StackSamplingProfiler,
}

impl Recorder {
    /// Open the output database and start the workload thread. Sampling
    /// begins with [`run`](Self::run).
    pub fn new(output: &Path, workload: Workload, params: SamplingParams) -> Result<Self> {
        let workload = WorkloadThread::spawn(workload)?;
        let storage = Storage::new(output, workload.tid, &params)?;
        storage.set_meta("workload", workload.kind.name())?;

        let profiler = StackSamplingProfiler::new(workload.tid, params);
        // Leftovers of earlier runs in this process belong to nobody
        let stale = StackSamplingProfiler::get_pending_profiles();
        if !stale.is_empty() {
            tracing::debug!("discarding {} stale pending profiles", stale.len());
        }

        Ok(Recorder {
            output: output.to_path_buf(),
            storage,
            workload,
            profiler,
        })
    }

    pub fn target(&self) -> PlatformThreadId {
        self.workload.tid
    }

    /// Handle that ends the recording early (e.g. from a Ctrl-C handler)
    pub fn stop_handle(&self) -> StopHandle {
        self.profiler.stop_handle()
    }

    /// Sample until all bursts are done or a stop is requested, then
    /// persist everything collected.
    pub fn run(mut self) -> Result<RecordOutcome> {
        self.profiler.start();
        let run = self.profiler.wait().cloned().unwrap_or_default();
        self.workload.finish();

        if run.unavailable {
            return Err(Error::UnsupportedPlatform(format!(
                "no stack capturer for thread {} on this platform",
                self.workload.tid
            )));
        }

        let profiles = StackSamplingProfiler::get_pending_profiles();
        for profile in &profiles {
            if let Err(e) = profile.validate() {
                tracing::warn!("dropping malformed profile: {}", e);
                continue;
            }
            self.storage.record_profile(profile)?;
        }

        Ok(RecordOutcome {
            output: self.output,
            run,
            written: self.storage.profile_count()? as usize,
            samples: self.storage.sample_count()?,
        })
    }
}

/// Thread running a synthetic workload until told to finish
struct WorkloadThread {
    kind: Workload,
    tid: PlatformThreadId,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl WorkloadThread {
    fn spawn(kind: Workload) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let r = running.clone();

        let handle = std::thread::Builder::new()
            .name(format!("stackprof-{}", kind.name()))
            .spawn(move || {
                // The receiver only disappears if the recorder gave up
                let _ = tx.send(PlatformThreadId::current());
                run_workload(kind, &r)
            })?;

        let tid = rx.recv().map_err(|_| {
            Error::ThreadNotFound(format!("{} workload exited before starting", kind.name()))
        })?;

        Ok(WorkloadThread {
            kind,
            tid,
            running,
            handle: Some(handle),
        })
    }

    fn finish(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("{} workload panicked", self.kind.name());
        }
    }
}

impl Drop for WorkloadThread {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run_workload(kind: Workload, running: &AtomicBool) -> u64 {
    let mut acc = 0u64;
    while running.load(Ordering::Relaxed) {
        acc = acc.wrapping_add(match kind {
            Workload::Spin => spin(black_box(100_000)),
            Workload::Recurse => recurse(black_box(24)),
            Workload::Sleep => {
                std::thread::sleep(Duration::from_millis(1));
                1
            }
        });
    }
    acc
}

#[inline(never)]
fn spin(rounds: u64) -> u64 {
    let mut x = rounds;
    for i in 0..rounds {
        x = black_box(x.wrapping_mul(6364136223846793005).wrapping_add(i));
    }
    x
}

#[inline(never)]
fn recurse(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    black_box(recurse(n - 1)).wrapping_add(recurse(n - 2))
}
