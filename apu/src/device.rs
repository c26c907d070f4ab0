//! Capability facade. These functions are safe to call whether or not an accelerator is present,
//! without an accelerator they degrade to no-ops, so callers never have to branch on availability.

use crate::backend::ApuHooks;
use crate::error::ApuError;
use crate::fork::{is_in_bad_fork, track_bad_fork};
use crate::runtime;

/// Is there an usable accelerator in this process?
///
/// Returns false in processes forked after the accelerator was initialized.
/// Without an accelerator this returns false, unless the crate was built
/// with feature `assume-available`.
#[must_use]
pub fn is_available() -> bool {
    track_bad_fork();
    // Do not initialize drivers in a bad fork
    if is_in_bad_fork() {
        return false;
    }
    is_available_with(runtime::hooks())
}

/// Sets the seed of the default generator. No-op without an accelerator.
pub fn manual_seed(seed: u64) {
    track_bad_fork();
    if is_in_bad_fork() {
        return;
    }
    manual_seed_with(runtime::hooks(), seed);
}

/// Blocks until all work submitted to the accelerator is completed. No-op without an accelerator.
///
/// # Errors
/// Propagates driver errors of the bound hooks provider.
pub fn synchronize() -> Result<(), ApuError> {
    track_bad_fork();
    if is_in_bad_fork() {
        return Ok(());
    }
    synchronize_with(runtime::hooks())
}

/// Flushes pending commands to the accelerator without waiting for them to complete.
/// No-op without an accelerator.
///
/// # Errors
/// Propagates driver errors of the bound hooks provider.
pub fn commit() -> Result<(), ApuError> {
    track_bad_fork();
    if is_in_bad_fork() {
        return Ok(());
    }
    commit_with(runtime::hooks())
}

/// Was this crate built with support for a real accelerator?
/// The runtime is loaded dynamically, so this can be true while [`is_available`] is false.
#[must_use]
pub const fn is_built() -> bool {
    cfg!(feature = "hip")
}

pub(crate) fn is_available_with(hooks: &dyn ApuHooks) -> bool {
    !is_in_bad_fork() && (hooks.has_apu() || cfg!(feature = "assume-available"))
}

pub(crate) fn manual_seed_with(hooks: &dyn ApuHooks, seed: u64) {
    if !hooks.has_apu() {
        return;
    }
    if let Some(generator) = hooks.default_generator() {
        // Lock is held only for the seed mutation
        generator.lock().set_current_seed(seed);
    }
}

pub(crate) fn synchronize_with(hooks: &dyn ApuHooks) -> Result<(), ApuError> {
    if !hooks.has_apu() {
        return Ok(());
    }
    hooks.device_synchronize()?;
    Ok(())
}

pub(crate) fn commit_with(hooks: &dyn ApuHooks) -> Result<(), ApuError> {
    if !hooks.has_apu() {
        return Ok(());
    }
    hooks.commit_stream()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyConfig, DummyDevice, NoAccelerator};

    #[test]
    fn facade_without_accelerator_is_noop() {
        let hooks = NoAccelerator;
        assert_eq!(is_available_with(&hooks), cfg!(feature = "assume-available"));
        manual_seed_with(&hooks, 42);
        synchronize_with(&hooks).unwrap();
        commit_with(&hooks).unwrap();
    }

    #[test]
    fn manual_seed_sets_generator_seed() {
        let dev = DummyDevice::new(&DummyConfig::enabled());
        assert!(is_available_with(&dev));
        manual_seed_with(&dev, 1234);
        assert_eq!(dev.default_generator().unwrap().current_seed(), 1234);
    }

    #[test]
    fn commit_does_not_complete_work() {
        let dev = DummyDevice::new(&DummyConfig::enabled());
        dev.submit();
        commit_with(&dev).unwrap();
        let event = dev.acquire_event(false).unwrap();
        dev.record_event(event).unwrap();
        assert!(!dev.query_event(event).unwrap());
        synchronize_with(&dev).unwrap();
        assert!(dev.query_event(event).unwrap());
    }
}
