//! Fallback when no native capture backend exists for this target

use super::StackCapturer;
use crate::thread::PlatformThreadId;

pub fn create(thread: PlatformThreadId) -> Option<Box<dyn StackCapturer>> {
    tracing::warn!(
        "stack sampling is not supported on {}-{}; thread {} will not be sampled",
        std::env::consts::OS,
        std::env::consts::ARCH,
        thread
    );
    None
}
