//! SIGUSR1 handling.
//!
//! The handler only sets an atomic flag. Exactly one thread - the host
//! thread - keeps SIGUSR1 unblocked and installs the handler without
//! `SA_RESTART`, so its blocking reads surface `EINTR` and it can run the
//! reset path; every other thread masks the signal on entry.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

static RESET_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigusr1(_signo: libc::c_int) {
    // Async-signal-safe: a single atomic store.
    RESET_REQUESTED.store(true, Ordering::SeqCst);
}

/// The flag the handler sets; passed to interruptible reads.
pub fn reset_flag() -> &'static AtomicBool {
    &RESET_REQUESTED
}

/// Consumes a pending reset request.
pub fn take_reset_request() -> bool {
    RESET_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Installs the SIGUSR1 handler. No `SA_RESTART`: the host thread relies
/// on `EINTR` to notice the flag while blocked in a read.
pub fn install_handler() -> io::Result<()> {
    // SAFETY: the sigaction struct is fully initialized before use and the
    // handler performs only an async-signal-safe atomic store.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_sigusr1 as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGUSR1, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn change_thread_mask(how: libc::c_int) -> io::Result<()> {
    // SAFETY: the signal set is initialized before pthread_sigmask reads it.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGUSR1);
        let rc = libc::pthread_sigmask(how, &set, ptr::null_mut());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

/// Masks SIGUSR1 on the calling thread. Called by job and session workers
/// on entry, and by `main` before spawning so children start masked.
pub fn block_on_this_thread() -> io::Result<()> {
    change_thread_mask(libc::SIG_BLOCK)
}

/// Unmasks SIGUSR1 on the calling thread; only the host thread does this.
pub fn unblock_on_this_thread() -> io::Result<()> {
    change_thread_mask(libc::SIG_UNBLOCK)
}
