//! Device capability shim for APU accelerators.
//!
//! The crate exposes a small always-safe facade ([`is_available`], [`manual_seed`], [`synchronize`],
//! [`commit`]) and a named dispatch table ([`FunctionRegistry`]) that a scripting runtime uses
//! to call into the accelerator. The real work is done by exactly one [`ApuHooks`] provider per process.
//! If no accelerator is present, [`NoAccelerator`] is bound and state mutating calls become no-ops.
//!
//! Processes forked after the accelerator was touched are detected by the fork guard
//! ([`track_bad_fork`], [`is_in_bad_fork`]); in such child, the accelerator is treated as unusable.
//!
//! Set env var `APU_DEBUG` to a bitmask to print diagnostics:
//! 1 backend selection, 2 dispatched calls, 4 fork guard, 8 profiler.

#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![forbid(missing_debug_implementations)]
#![forbid(unused_import_braces)]
#![forbid(unused_must_use)]

use std::sync::OnceLock;

mod backend;
mod device;
mod dispatch;
mod error;
mod fork;
mod generator;
mod mutex;
mod platform;
#[cfg(feature = "py")]
mod py_bindings;
mod rng;
mod runtime;
mod value;

pub use backend::{ApuHooks, Config, DummyConfig, DummyDevice, EventId, HIPConfig, NoAccelerator};
#[cfg(feature = "hip")]
pub use backend::HIPDevice;
pub use device::{commit, is_available, is_built, manual_seed, synchronize};
pub use dispatch::{CallStyle, ForkPolicy, FunctionRegistry, Handler, Param};
pub use error::{ApuError, BackendError, ErrorStatus};
pub use fork::{is_in_bad_fork, is_tracking_forks, track_bad_fork};
pub use generator::{Generator, GeneratorState, DEFAULT_SEED};
pub use platform::macos_version;
pub use runtime::{backend_name, bind_hooks, config_dir, initialize};
pub use value::Value;

/// Which diagnostics get printed, read from env var `APU_DEBUG`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebugMask(u32);

impl DebugMask {
    #[must_use]
    pub const fn new(mask: u32) -> DebugMask {
        DebugMask(mask)
    }

    /// Is backend debugging enabled? This is the first bit.
    #[must_use]
    pub const fn backend(self) -> bool {
        self.0 % 2 == 1
    }

    /// Is dispatch debugging enabled? This is the second bit.
    #[must_use]
    pub const fn dispatch(self) -> bool {
        (self.0 >> 1) % 2 == 1
    }

    /// Is fork guard debugging enabled? This is the third bit.
    #[must_use]
    pub const fn fork(self) -> bool {
        (self.0 >> 2) % 2 == 1
    }

    /// Is profiler debugging enabled? This is the fourth bit.
    #[must_use]
    pub const fn profiler(self) -> bool {
        (self.0 >> 3) % 2 == 1
    }
}

// Kept separate from the runtime, the fork guard must be able to log without binding a backend
static DEBUG: OnceLock<DebugMask> = OnceLock::new();

pub(crate) fn debug() -> DebugMask {
    *DEBUG.get_or_init(|| {
        std::env::var("APU_DEBUG")
            .ok()
            .and_then(|x| x.trim().parse::<u32>().ok())
            .map(DebugMask)
            .unwrap_or_default()
    })
}

#[test]
fn debug_mask_bits() {
    let mask = DebugMask::new(0b1010);
    assert!(!mask.backend());
    assert!(mask.dispatch());
    assert!(!mask.fork());
    assert!(mask.profiler());
    assert_eq!(DebugMask::default(), DebugMask::new(0));
}
