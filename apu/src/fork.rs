//! Tracking of processes forked after the accelerator was initialized.
//!
//! Driver state (contexts, command queues, open handles) does not survive fork.
//! The guard only records that a fork happened, refusing accelerator work
//! in such child is up to the callers (see `dispatch::ForkPolicy`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

// True for children forked after apu init
static IN_BAD_FORK: AtomicBool = AtomicBool::new(false);
static TRACK_FORK: Once = Once::new();

// Called in the forked child, before any other thread exists in it
unsafe extern "C" fn forked_apu_child() {
    IN_BAD_FORK.store(true, Ordering::Release);
}

/// Registers the child-side fork handler. Must be called before any accelerator call,
/// so that the first fork after accelerator use is caught. Only the first call registers,
/// registering twice would invoke the handler twice.
pub fn track_bad_fork() {
    TRACK_FORK.call_once(|| {
        #[cfg(unix)]
        {
            // SAFETY: forked_apu_child only stores into an atomic, which is async-signal-safe
            let status = unsafe { libc::pthread_atfork(None, None, Some(forked_apu_child)) };
            if crate::debug().fork() {
                println!("Registered APU fork handler, status {status}");
            }
        }
    });
}

/// Whether this process is a child forked after the accelerator was initialized.
/// Never blocks and never touches the device.
#[must_use]
pub fn is_in_bad_fork() -> bool {
    IN_BAD_FORK.load(Ordering::Acquire)
}

/// Whether the fork handler was already registered in this process
#[must_use]
pub fn is_tracking_forks() -> bool {
    TRACK_FORK.is_completed()
}
