//! Provider bound when there is no accelerator.
//! State-mutating calls are no-ops, so callers never have to branch on availability.

use super::{ApuHooks, EventId};
use crate::error::{BackendError, ErrorStatus};
use crate::generator::Generator;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoAccelerator;

fn unavailable(op: &str) -> BackendError {
    BackendError::new(ErrorStatus::NoDevice, format!("{op} requires an APU, but no APU backend is available."))
}

impl ApuHooks for NoAccelerator {
    fn name(&self) -> &'static str {
        "none"
    }

    fn has_apu(&self) -> bool {
        false
    }

    fn default_generator(&self) -> Option<Generator> {
        None
    }

    fn device_synchronize(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn commit_stream(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn empty_cache(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_memory_fraction(&self, fraction: f64) -> Result<(), BackendError> {
        let _ = fraction;
        Ok(())
    }

    fn current_allocated_memory(&self) -> Result<u64, BackendError> {
        Ok(0)
    }

    fn driver_allocated_memory(&self) -> Result<u64, BackendError> {
        Ok(0)
    }

    fn profiler_start_trace(&self, mode: &str, wait_until_completed: bool) -> Result<(), BackendError> {
        let _ = (mode, wait_until_completed);
        Err(unavailable("profilerStartTrace"))
    }

    fn profiler_stop_trace(&self) -> Result<(), BackendError> {
        Err(unavailable("profilerStopTrace"))
    }

    fn acquire_event(&self, enable_timing: bool) -> Result<EventId, BackendError> {
        let _ = enable_timing;
        Err(unavailable("acquireEvent"))
    }

    fn release_event(&self, event: EventId) -> Result<(), BackendError> {
        let _ = event;
        Err(unavailable("releaseEvent"))
    }

    fn record_event(&self, event: EventId) -> Result<(), BackendError> {
        let _ = event;
        Err(unavailable("recordEvent"))
    }

    fn wait_for_event(&self, event: EventId) -> Result<(), BackendError> {
        let _ = event;
        Err(unavailable("waitForEvent"))
    }

    fn synchronize_event(&self, event: EventId) -> Result<(), BackendError> {
        let _ = event;
        Err(unavailable("synchronizeEvent"))
    }

    fn query_event(&self, event: EventId) -> Result<bool, BackendError> {
        let _ = event;
        Err(unavailable("queryEvent"))
    }

    fn elapsed_time_of_events(&self, start: EventId, end: EventId) -> Result<f64, BackendError> {
        let _ = (start, end);
        Err(unavailable("elapsedTimeOfEvents"))
    }
}
