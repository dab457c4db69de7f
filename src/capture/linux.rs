//! Signal-based stack capture for threads of the current process.
//!
//! A capture arms a process-wide slot with the target tid and sends SIGPROF
//! to the target with `tgkill`. The handler runs on the target thread, reads
//! the interrupted PC and frame pointer from the `ucontext`, walks the frame
//! pointer chain into the slot and marks it done. The handler never
//! allocates or locks.
//!
//! The slot is armed by storing the target tid. Whoever swaps it back to 0
//! first owns the capture: the handler (which then fills the slot and sets
//! `done`) or the sampler giving up after a timeout (so a late signal finds
//! nothing to write).

use super::StackCapturer;
use crate::error::{Error, Result};
use crate::process::{self, ModuleResolver};
use crate::profile::{Frame, ModuleTable, Sample};
use crate::thread::PlatformThreadId;
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Maximum stack depth to capture
const MAX_STACK_DEPTH: usize = 128;

/// Frames are only followed this far above the interrupted stack pointer
const MAX_STACK_BYTES: usize = 64 * 1024 * 1024;

/// How long a capture waits for the target to run its handler
const CAPTURE_TIMEOUT: Duration = Duration::from_millis(50);

/// `armed_tid` value of a disarmed slot
const DISARMED: u64 = 0;

struct CaptureSlot {
    armed_tid: AtomicU64,
    done: AtomicBool,
    depth: AtomicUsize,
    stack: [AtomicU64; MAX_STACK_DEPTH],
}

static SLOT: CaptureSlot = CaptureSlot {
    armed_tid: AtomicU64::new(DISARMED),
    done: AtomicBool::new(false),
    depth: AtomicUsize::new(0),
    stack: [const { AtomicU64::new(0) }; MAX_STACK_DEPTH],
};

/// One capture in flight per process
static CAPTURE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Result of installing the SIGPROF handler (errno on failure)
static HANDLER: OnceLock<std::result::Result<(), i32>> = OnceLock::new();

/// Samples one thread of the current process by interrupting it with SIGPROF.
pub struct SignalStackCapturer {
    thread: PlatformThreadId,
    pid: libc::pid_t,
    resolver: ModuleResolver,
    /// Maps are re-read at most once per profile
    refreshed: bool,
}

impl SignalStackCapturer {
    pub fn new(thread: PlatformThreadId) -> Result<Self> {
        if !process::thread_exists(thread) {
            return Err(Error::ThreadNotFound(format!("tid {}", thread)));
        }

        install_handler()?;

        Ok(SignalStackCapturer {
            thread,
            pid: nix::unistd::getpid().as_raw(),
            resolver: ModuleResolver::new()?,
            refreshed: false,
        })
    }

    fn to_frames(&mut self, stack: &[u64], modules: &mut ModuleTable) -> Sample {
        stack
            .iter()
            .map(|&ip| {
                let module = match self.resolver.lookup(ip) {
                    Some(module) => Some(module),
                    None if !self.refreshed => {
                        self.refreshed = true;
                        self.resolver.resolve(ip)
                    }
                    None => None,
                };
                match module {
                    Some(module) => Frame::new(ip, modules.intern(module)),
                    None => Frame::unresolved(ip),
                }
            })
            .collect()
    }
}

impl StackCapturer for SignalStackCapturer {
    fn profile_recording_starting(&mut self) {
        self.refreshed = false;
    }

    fn record_stack_sample(&mut self, modules: &mut ModuleTable) -> Result<Sample> {
        let stack = capture(self.pid, self.thread)?;
        Ok(self.to_frames(&stack, modules))
    }

    fn profile_recording_stopped(&mut self) {}
}

fn install_handler() -> Result<()> {
    let installed = HANDLER.get_or_init(|| unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sample_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);

        if libc::sigaction(libc::SIGPROF, &sa, std::ptr::null_mut()) < 0 {
            Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
        } else {
            tracing::debug!("installed SIGPROF stack sampling handler");
            Ok(())
        }
    });

    match *installed {
        Ok(()) => Ok(()),
        Err(errno) => Err(Error::UnsupportedPlatform(format!(
            "cannot install SIGPROF handler: {}",
            std::io::Error::from_raw_os_error(errno)
        ))),
    }
}

/// Interrupt `thread` and copy out its stack
fn capture(pid: libc::pid_t, thread: PlatformThreadId) -> Result<Vec<u64>> {
    let _guard = CAPTURE_LOCK.lock();
    let tid = thread.as_raw();

    SLOT.depth.store(0, Ordering::Relaxed);
    SLOT.done.store(false, Ordering::Relaxed);
    SLOT.armed_tid.store(tid, Ordering::Release);

    let ret = unsafe { libc::syscall(libc::SYS_tgkill, pid, tid as libc::pid_t, libc::SIGPROF) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        SLOT.armed_tid.store(DISARMED, Ordering::Release);
        return Err(match err.raw_os_error() {
            Some(libc::ESRCH) => Error::ThreadNotFound(format!("tid {}", thread)),
            _ => Error::Capture(format!("tgkill failed: {}", err)),
        });
    }

    let deadline = Instant::now() + CAPTURE_TIMEOUT;
    let mut spins = 0u32;
    while !SLOT.done.load(Ordering::Acquire) {
        if Instant::now() >= deadline
            && SLOT
                .armed_tid
                .compare_exchange(tid, DISARMED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Err(Error::Timeout(CAPTURE_TIMEOUT));
        }
        // Past the deadline with a failed swap the handler owns the slot and
        // finishes promptly.
        spins += 1;
        if spins < 64 {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(Duration::from_micros(20));
        }
    }

    let depth = SLOT.depth.load(Ordering::Relaxed).min(MAX_STACK_DEPTH);
    let stack = SLOT.stack[..depth]
        .iter()
        .map(|a| a.load(Ordering::Relaxed))
        .collect();
    Ok(stack)
}

/// SIGPROF handler, runs on the interrupted target thread
extern "C" fn sample_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    ucontext: *mut libc::c_void,
) {
    let saved_errno = unsafe { *libc::__errno_location() };

    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as u64;
    if SLOT
        .armed_tid
        .compare_exchange(tid, DISARMED, Ordering::AcqRel, Ordering::Relaxed)
        .is_ok()
    {
        let depth = if ucontext.is_null() {
            0
        } else {
            let (pc, fp, sp) = unsafe { registers(ucontext as *const libc::ucontext_t) };
            walk_frames(pc, fp, sp)
        };
        SLOT.depth.store(depth, Ordering::Relaxed);
        SLOT.done.store(true, Ordering::Release);
    }

    unsafe { *libc::__errno_location() = saved_errno };
}

/// Interrupted (pc, frame pointer, stack pointer)
#[cfg(target_arch = "x86_64")]
unsafe fn registers(uc: *const libc::ucontext_t) -> (u64, usize, usize) {
    const REG_RBP: usize = 10;
    const REG_RSP: usize = 15;
    const REG_RIP: usize = 16;
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    (
        gregs[REG_RIP] as u64,
        gregs[REG_RBP] as usize,
        gregs[REG_RSP] as usize,
    )
}

/// Interrupted (pc, frame pointer, stack pointer)
#[cfg(target_arch = "aarch64")]
unsafe fn registers(uc: *const libc::ucontext_t) -> (u64, usize, usize) {
    let mcontext = unsafe { &(*uc).uc_mcontext };
    (mcontext.pc, mcontext.regs[29] as usize, mcontext.sp as usize)
}

/// Walk the frame pointer chain into the slot. Returns the depth written.
fn walk_frames(pc: u64, start_fp: usize, sp: usize) -> usize {
    let mut depth = 0usize;

    if pc != 0 {
        SLOT.stack[0].store(pc, Ordering::Relaxed);
        depth = 1;
    }

    let stack_limit = sp.saturating_add(MAX_STACK_BYTES);
    let mut fp = start_fp;

    while fp != 0 && depth < MAX_STACK_DEPTH {
        // Frame records are word aligned and live on this thread's stack
        if fp & 0x7 != 0 || fp < sp || fp >= stack_limit {
            break;
        }

        // [fp] = caller's frame pointer, [fp + 8] = return address
        let Some((next_fp, ret_addr)) = read_frame_record(fp) else {
            break;
        };
        if ret_addr == 0 {
            break;
        }

        SLOT.stack[depth].store(ret_addr as u64, Ordering::Relaxed);
        depth += 1;

        if next_fp <= fp {
            break;
        }
        fp = next_fp;
    }

    depth
}

/// Read a frame record through `process_vm_readv` so a bogus frame pointer
/// yields EFAULT instead of a fault on the target thread.
fn read_frame_record(fp: usize) -> Option<(usize, usize)> {
    let mut record = [0usize; 2];
    let local = libc::iovec {
        iov_base: record.as_mut_ptr() as *mut libc::c_void,
        iov_len: std::mem::size_of_val(&record),
    };
    let remote = libc::iovec {
        iov_base: fp as *mut libc::c_void,
        iov_len: std::mem::size_of_val(&record),
    };
    let read = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
    if read as usize != std::mem::size_of_val(&record) {
        return None;
    }
    Some((record[0], record[1]))
}
