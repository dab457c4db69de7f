use std::fmt;

/// Identity of the thread whose stack is sampled.
///
/// On Linux this is the kernel thread id (`gettid`). The value is only
/// meaningful inside the process that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformThreadId(u64);

impl PlatformThreadId {
    pub const fn from_raw(raw: u64) -> Self {
        PlatformThreadId(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Id of the calling thread
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn current() -> Self {
        PlatformThreadId(nix::unistd::gettid().as_raw() as u64)
    }

    /// Id of the calling thread
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn current() -> Self {
        PlatformThreadId(unsafe { libc::pthread_self() } as u64)
    }
}

impl fmt::Display for PlatformThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_differs_between_threads() {
        let here = PlatformThreadId::current();
        let there = std::thread::spawn(PlatformThreadId::current)
            .join()
            .unwrap();
        assert_ne!(here, there);
        assert_eq!(here, PlatformThreadId::current());
    }

    #[test]
    fn test_raw_roundtrip() {
        let id = PlatformThreadId::from_raw(4242);
        assert_eq!(id.as_raw(), 4242);
        assert_eq!(id.to_string(), "4242");
    }
}
