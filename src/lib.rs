pub mod capture;
pub mod cli;
pub mod commands;
pub mod error;
pub mod params;
pub mod process;
pub mod profile;
pub mod profiler;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod thread;

pub use capture::{CapturerFactory, NativeCapturerFactory, StackCapturer};
pub use error::{Error, Result};
pub use params::SamplingParams;
pub use profile::{Frame, Module, ModuleTable, Profile, Sample};
pub use profiler::{StackSamplingProfiler, StopHandle};
pub use scheduler::{RunSummary, SchedulerState};
pub use sink::PendingProfiles;
pub use thread::PlatformThreadId;
