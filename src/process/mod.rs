//! Introspection of the current process: memory maps and loaded modules.

mod maps;
mod modules;

pub use maps::{MemoryMapping, MemoryMaps};
pub use modules::{ModuleResolver, read_build_id};

use crate::thread::PlatformThreadId;
use std::path::Path;

/// Whether `thread` is a live thread of the current process
pub fn thread_exists(thread: PlatformThreadId) -> bool {
    Path::new(&format!("/proc/self/task/{}", thread.as_raw())).exists()
}
