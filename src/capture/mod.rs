//! Stack capture backends.
//!
//! The scheduler only sees the [`StackCapturer`] trait. Backends are picked
//! at construction time by a [`CapturerFactory`]; a factory returns `None`
//! when the platform or the target thread cannot be sampled, and the
//! scheduler then collects nothing.
//!
//! The native backend (Linux, x86_64 and aarch64) interrupts the target
//! thread with a signal and walks its frame pointers. Build the profiled
//! code with frame pointers for complete stacks:
//! ```bash
//! RUSTFLAGS="-C force-frame-pointers=yes" cargo build --release
//! ```

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
mod linux;

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub use linux::SignalStackCapturer;

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
mod stub;

use crate::error::Result;
use crate::profile::{ModuleTable, Sample};
use crate::thread::PlatformThreadId;

/// Records stack samples of one target thread.
///
/// All methods are called on the sampling thread, never on the target.
pub trait StackCapturer: Send {
    /// A new profile is about to be recorded. Per-profile state such as
    /// module indices must be reset here.
    fn profile_recording_starting(&mut self);

    /// Capture one stack of the target thread, innermost frame first.
    ///
    /// Modules the frames belong to are interned into `modules`, the module
    /// list of the profile being recorded. An error only costs this sample
    /// slot; the burst continues.
    fn record_stack_sample(&mut self, modules: &mut ModuleTable) -> Result<Sample>;

    /// The current profile is finished (all samples taken, or cancelled).
    fn profile_recording_stopped(&mut self);
}

/// Creates capturers for a target thread.
pub trait CapturerFactory: Send + Sync {
    /// `None` when the platform or thread cannot be sampled
    fn create(&self, thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>>;
}

impl<F> CapturerFactory for F
where
    F: Fn(PlatformThreadId) -> Option<Box<dyn StackCapturer>> + Send + Sync,
{
    fn create(&self, thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>> {
        self(thread)
    }
}

/// Factory for the platform's native backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCapturerFactory;

impl CapturerFactory for NativeCapturerFactory {
    fn create(&self, thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>> {
        create_native(thread)
    }
}

/// Create the native capturer for `thread`, if this platform supports one
#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub fn create_native(thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>> {
    match SignalStackCapturer::new(thread) {
        Ok(capturer) => Some(Box::new(capturer)),
        Err(e) => {
            tracing::warn!("stack sampling unavailable for thread {}: {}", thread, e);
            None
        }
    }
}

/// Create the native capturer for `thread`, if this platform supports one
#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
pub fn create_native(thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>> {
    stub::create(thread)
}
