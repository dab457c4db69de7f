#![allow(dead_code)]

use stackprof::{
    CapturerFactory, Frame, Module, ModuleTable, PlatformThreadId, Sample, StackCapturer,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the same two-frame stack on every call
pub struct FixedCapturer {
    pub calls: Arc<AtomicUsize>,
}

impl StackCapturer for FixedCapturer {
    fn profile_recording_starting(&mut self) {}

    fn record_stack_sample(&mut self, modules: &mut ModuleTable) -> stackprof::Result<Sample> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let exe = modules.intern(Module::new(0x40_0000, "feedface", "/opt/app"));
        Ok(vec![Frame::new(0x40_1234, exe), Frame::unresolved(0x7fff_0000)])
    }

    fn profile_recording_stopped(&mut self) {}
}

pub fn fixed_factory() -> (Arc<dyn CapturerFactory>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let factory = move |_thread: PlatformThreadId| {
        Some(Box::new(FixedCapturer { calls: c.clone() }) as Box<dyn StackCapturer>)
    };
    (Arc::new(factory), calls)
}

pub fn no_capturer() -> Arc<dyn CapturerFactory> {
    Arc::new(|_thread: PlatformThreadId| -> Option<Box<dyn StackCapturer>> { None })
}

pub fn target() -> PlatformThreadId {
    PlatformThreadId::from_raw(1234)
}
