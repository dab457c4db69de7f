//! Value types describing captured stacks.
//!
//! A [`Profile`] is the unit of delivery: the result of one sampling burst.
//! Frames reference modules by index into their owning profile's module list
//! so the per-frame footprint stays at two words.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A loaded code module (executable or shared library) a frame belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Module {
    /// Load base of the module. Process-local, not stable across runs.
    pub base_address: u64,
    /// Build identifier used to match symbols later (hex GNU build id on Linux).
    /// Empty when the module carries none.
    pub id: String,
    /// Path of the mapped file
    pub path: PathBuf,
}

impl Module {
    pub fn new(base_address: u64, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Module {
            base_address,
            id: id.into(),
            path: path.into(),
        }
    }
}

/// One sampled location.
///
/// Ordering compares the instruction pointer first and the module index
/// second; an unresolved module sorts before any resolved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame {
    pub instruction_pointer: u64,
    /// Index into the owning profile's module list, `None` if unresolved
    pub module_index: Option<usize>,
}

impl Frame {
    pub fn new(instruction_pointer: u64, module_index: usize) -> Self {
        Frame {
            instruction_pointer,
            module_index: Some(module_index),
        }
    }

    pub fn unresolved(instruction_pointer: u64) -> Self {
        Frame {
            instruction_pointer,
            module_index: None,
        }
    }
}

/// One stack capture, innermost frame first.
pub type Sample = Vec<Frame>;

/// The result of one sampling burst.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub modules: Vec<Module>,
    pub samples: Vec<Sample>,
    /// Wall time actually spent collecting
    pub profile_duration: Duration,
    /// Configured time between samples
    pub sampling_period: Duration,
    /// Consumers must keep `samples` in capture order when set
    pub preserve_sample_ordering: bool,
}

impl Profile {
    /// Total number of frames across all samples
    pub fn frame_count(&self) -> usize {
        self.samples.iter().map(Vec::len).sum()
    }

    /// Check that every frame's module index points into `modules`.
    pub fn validate(&self) -> Result<()> {
        for (sample_idx, sample) in self.samples.iter().enumerate() {
            for frame in sample {
                if let Some(idx) = frame.module_index
                    && idx >= self.modules.len()
                {
                    return Err(Error::InvalidProfile(format!(
                        "sample {} frame 0x{:x} references module {} of {}",
                        sample_idx,
                        frame.instruction_pointer,
                        idx,
                        self.modules.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-profile module list that hands out stable indices.
///
/// Modules are keyed by base address; interning the same module twice returns
/// the first index.
#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: Vec<Module>,
    by_base: HashMap<u64, usize>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, module: Module) -> usize {
        if let Some(&idx) = self.by_base.get(&module.base_address) {
            return idx;
        }
        let idx = self.modules.len();
        self.by_base.insert(module.base_address, idx);
        self.modules.push(module);
        idx
    }

    pub fn get(&self, index: usize) -> Option<&Module> {
        self.modules.get(index)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn into_modules(self) -> Vec<Module> {
        self.modules
    }
}

/// A profile under construction during a burst.
pub struct ProfileBuilder {
    modules: ModuleTable,
    samples: Vec<Sample>,
    started: Instant,
    sampling_period: Duration,
    preserve_sample_ordering: bool,
}

impl ProfileBuilder {
    pub fn new(sampling_period: Duration, preserve_sample_ordering: bool) -> Self {
        ProfileBuilder {
            modules: ModuleTable::new(),
            samples: Vec::new(),
            started: Instant::now(),
            sampling_period,
            preserve_sample_ordering,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn modules_mut(&mut self) -> &mut ModuleTable {
        &mut self.modules
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Freeze the profile, stamping the elapsed wall time since the burst began.
    pub fn finish(self) -> Profile {
        Profile {
            modules: self.modules.into_modules(),
            samples: self.samples,
            profile_duration: self.started.elapsed(),
            sampling_period: self.sampling_period,
            preserve_sample_ordering: self.preserve_sample_ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_ordering_ip_first() {
        let a = Frame::new(0x1000, 5);
        let b = Frame::new(0x2000, 0);
        let c = Frame::new(0x1000, 7);
        let d = Frame::unresolved(0x1000);

        assert!(a < b);
        assert!(a < c);
        assert!(d < a);
        assert_ne!(a, c);
        assert_eq!(a, Frame::new(0x1000, 5));
    }

    #[test]
    fn test_module_table_dedups_by_base() {
        let mut table = ModuleTable::new();
        let libc = table.intern(Module::new(0x7f00_0000, "abcd", "/lib/libc.so.6"));
        let exe = table.intern(Module::new(0x5555_0000, "", "/usr/bin/app"));
        let again = table.intern(Module::new(0x7f00_0000, "abcd", "/lib/libc.so.6"));

        assert_eq!(libc, 0);
        assert_eq!(exe, 1);
        assert_eq!(again, libc);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).map(|m| m.id.as_str()), Some("abcd"));
    }

    #[test]
    fn test_validate_rejects_dangling_module_index() {
        let profile = Profile {
            modules: vec![Module::new(0x1000, "", "/bin/a")],
            samples: vec![vec![Frame::new(0x1010, 0), Frame::new(0x2020, 3)]],
            ..Default::default()
        };

        let err = profile.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidProfile(_)));
    }

    #[test]
    fn test_builder_finish() {
        let mut builder = ProfileBuilder::new(Duration::from_millis(10), true);
        let idx = builder
            .modules_mut()
            .intern(Module::new(0x4000, "feed", "/bin/b"));
        builder.push_sample(vec![Frame::new(0x4010, idx), Frame::unresolved(0x9)]);
        builder.push_sample(Vec::new());

        let profile = builder.finish();
        assert_eq!(profile.samples.len(), 2);
        assert_eq!(profile.frame_count(), 2);
        assert_eq!(profile.modules.len(), 1);
        assert_eq!(profile.sampling_period, Duration::from_millis(10));
        assert!(profile.preserve_sample_ordering);
        assert!(profile.validate().is_ok());
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        (0u64..64, proptest::option::of(0usize..4)).prop_map(|(ip, module_index)| Frame {
            instruction_pointer: ip,
            module_index,
        })
    }

    proptest! {
        #[test]
        fn frame_sort_is_total_and_stable(frames in proptest::collection::vec(arb_frame(), 0..200)) {
            let mut once = frames.clone();
            once.sort();
            let mut twice = once.clone();
            twice.sort();
            prop_assert_eq!(&once, &twice);

            for pair in once.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                prop_assert!(a <= b);
                prop_assert!(
                    a.instruction_pointer < b.instruction_pointer
                        || (a.instruction_pointer == b.instruction_pointer
                            && a.module_index <= b.module_index)
                );
            }
        }

        #[test]
        fn frame_equality_matches_fields(a in arb_frame(), b in arb_frame()) {
            let fields_equal = a.instruction_pointer == b.instruction_pointer
                && a.module_index == b.module_index;
            prop_assert_eq!(a == b, fields_equal);
            prop_assert_eq!(a.cmp(&b) == std::cmp::Ordering::Equal, fields_equal);
        }

        #[test]
        fn interned_indices_always_validate(
            bases in proptest::collection::vec(0u64..16, 1..40),
            picks in proptest::collection::vec(0usize..40, 0..60),
        ) {
            let mut builder = ProfileBuilder::new(Duration::from_millis(1), false);
            let indices: Vec<usize> = bases
                .iter()
                .map(|&b| builder.modules_mut().intern(Module::new(b * 0x1000, "", "/m")))
                .collect();
            let sample: Sample = picks
                .iter()
                .map(|&p| Frame::new(p as u64, indices[p % indices.len()]))
                .collect();
            builder.push_sample(sample);

            let profile = builder.finish();
            prop_assert!(profile.validate().is_ok());
        }
    }
}
