//! Host-simulated accelerator used for testing.
//!
//! Nothing is executed. The device keeps a single command stream as three counters:
//! commands submitted, commands committed to the device and commands completed.
//! Work completes only when something waits for it (device or event synchronization),
//! which makes the difference between commit and synchronize observable.

use std::collections::BTreeMap;
use std::time::Instant;

use nanoserde::DeJson;

use super::{ApuHooks, EventId};
use crate::error::{BackendError, ErrorStatus};
use crate::generator::{Generator, DEFAULT_SEED};
use crate::mutex::Mutex;

const DEFAULT_MEMORY_BYTES: u64 = 16 * 1024 * 1024 * 1024;

#[derive(Default, Debug, Clone, DeJson)]
pub struct DummyConfig {
    /// Use dummy device when no other backend is available
    #[nserde(default)]
    pub enabled: bool,
    /// Simulated device memory in bytes
    #[nserde(default)]
    pub memory_bytes: Option<u64>,
    /// Initial seed of the default generator
    #[nserde(default)]
    pub seed: Option<u64>,
}

impl DummyConfig {
    #[must_use]
    pub fn enabled() -> DummyConfig {
        DummyConfig { enabled: true, memory_bytes: None, seed: None }
    }
}

#[derive(Debug)]
pub struct DummyDevice {
    memory_bytes: u64,
    generator: Generator,
    state: Mutex<DummyState, 1_000_000>,
}

#[derive(Debug)]
struct DummyState {
    memory_fraction: f64,
    allocated: u64,
    cached: u64,
    submitted: u64,
    committed: u64,
    completed: u64,
    events: BTreeMap<EventId, DummyEvent>,
    next_event: EventId,
    trace: Option<Trace>,
}

#[derive(Debug)]
struct DummyEvent {
    timing: bool,
    recorded: Option<(u64, Instant)>,
}

#[derive(Debug)]
struct Trace {
    mode: Box<str>,
    started: Instant,
    position: u64,
}

impl DummyDevice {
    #[must_use]
    pub fn new(config: &DummyConfig) -> DummyDevice {
        DummyDevice {
            memory_bytes: config.memory_bytes.unwrap_or(DEFAULT_MEMORY_BYTES),
            generator: Generator::new(config.seed.unwrap_or(DEFAULT_SEED)),
            state: Mutex::new(DummyState {
                memory_fraction: 1.0,
                allocated: 0,
                cached: 0,
                submitted: 0,
                committed: 0,
                completed: 0,
                events: BTreeMap::new(),
                next_event: 1,
                trace: None,
            }),
        }
    }

    /// Allocates simulated device memory. Cached blocks are reused first,
    /// the cache is dropped before failing an allocation over the memory fraction limit.
    pub fn allocate(&self, bytes: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let limit = (state.memory_fraction * self.memory_bytes as f64) as u64;
        if state.cached >= bytes {
            state.cached -= bytes;
        } else {
            if !fits(state.allocated, state.cached, bytes, limit) {
                state.cached = 0;
            }
            if !fits(state.allocated, 0, bytes, limit) {
                return Err(BackendError::new(
                    ErrorStatus::MemoryAllocation,
                    format!(
                        "OOM, tried to allocate {bytes} B with {} B allocated and limit {limit} B",
                        state.allocated
                    ),
                ));
            }
        }
        state.allocated += bytes;
        Ok(())
    }

    /// Frees simulated device memory into the cache
    pub fn deallocate(&self, bytes: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if bytes > state.allocated {
            return Err(BackendError::new(
                ErrorStatus::MemoryAllocation,
                format!("Freeing {bytes} B, but only {} B are allocated", state.allocated),
            ));
        }
        state.allocated -= bytes;
        state.cached += bytes;
        Ok(())
    }

    /// Enqueues one simulated command into the stream
    pub fn submit(&self) {
        self.state.lock().submitted += 1;
    }

    /// Number of submitted, committed and completed commands
    #[must_use]
    pub fn stream_position(&self) -> (u64, u64, u64) {
        let state = self.state.lock();
        (state.submitted, state.committed, state.completed)
    }

    #[must_use]
    pub fn memory_fraction(&self) -> f64 {
        self.state.lock().memory_fraction
    }

    #[must_use]
    pub fn is_tracing(&self) -> bool {
        self.state.lock().trace.is_some()
    }
}

impl DummyState {
    fn event(&mut self, event: EventId) -> Result<&mut DummyEvent, BackendError> {
        self.events
            .get_mut(&event)
            .ok_or_else(|| BackendError::new(ErrorStatus::InvalidEvent, format!("Event {event} does not exist.")))
    }

    // Completes all work up to position
    fn complete(&mut self, position: u64) {
        self.committed = self.committed.max(position);
        self.completed = self.completed.max(position);
    }
}

// Overflowing sizes never fit
fn fits(allocated: u64, cached: u64, bytes: u64, limit: u64) -> bool {
    allocated.checked_add(cached).and_then(|used| used.checked_add(bytes)).is_some_and(|total| total <= limit)
}

impl ApuHooks for DummyDevice {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn has_apu(&self) -> bool {
        true
    }

    fn default_generator(&self) -> Option<Generator> {
        Some(self.generator.clone())
    }

    fn device_synchronize(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let submitted = state.submitted;
        state.complete(submitted);
        Ok(())
    }

    fn commit_stream(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.committed = state.submitted;
        Ok(())
    }

    fn empty_cache(&self) -> Result<(), BackendError> {
        self.state.lock().cached = 0;
        Ok(())
    }

    fn set_memory_fraction(&self, fraction: f64) -> Result<(), BackendError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(BackendError::new(
                ErrorStatus::InvalidValue,
                format!("Memory fraction {fraction} is outside of [0, 1]."),
            ));
        }
        self.state.lock().memory_fraction = fraction;
        Ok(())
    }

    fn current_allocated_memory(&self) -> Result<u64, BackendError> {
        Ok(self.state.lock().allocated)
    }

    fn driver_allocated_memory(&self) -> Result<u64, BackendError> {
        let state = self.state.lock();
        Ok(state.allocated + state.cached)
    }

    fn profiler_start_trace(&self, mode: &str, wait_until_completed: bool) -> Result<(), BackendError> {
        if mode.split(',').any(|m| m.trim().is_empty()) {
            return Err(BackendError::new(ErrorStatus::Profiler, format!("Invalid profiler mode {mode:?}.")));
        }
        let mut state = self.state.lock();
        if let Some(trace) = &state.trace {
            return Err(BackendError::new(
                ErrorStatus::Profiler,
                format!("Profiler trace in mode {:?} is already running.", trace.mode),
            ));
        }
        // Session is armed once everything submitted so far has finished
        if wait_until_completed {
            let submitted = state.submitted;
            state.complete(submitted);
        }
        let position = state.submitted;
        state.trace = Some(Trace { mode: mode.into(), started: Instant::now(), position });
        if crate::debug().profiler() {
            println!("Dummy profiler trace {mode:?} armed at command {position}");
        }
        Ok(())
    }

    fn profiler_stop_trace(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let Some(trace) = state.trace.take() else {
            return Err(BackendError::new(ErrorStatus::Profiler, "No profiler trace is running."));
        };
        if crate::debug().profiler() {
            println!(
                "Dummy profiler trace {:?} stopped after {:?}, {} commands submitted",
                trace.mode,
                trace.started.elapsed(),
                state.submitted - trace.position
            );
        }
        Ok(())
    }

    fn acquire_event(&self, enable_timing: bool) -> Result<EventId, BackendError> {
        let mut state = self.state.lock();
        let id = state.next_event;
        state.next_event = id
            .checked_add(1)
            .ok_or_else(|| BackendError::new(ErrorStatus::EventCreation, "Ran out of event ids."))?;
        state.events.insert(id, DummyEvent { timing: enable_timing, recorded: None });
        Ok(id)
    }

    fn release_event(&self, event: EventId) -> Result<(), BackendError> {
        match self.state.lock().events.remove(&event) {
            Some(_) => Ok(()),
            None => Err(BackendError::new(
                ErrorStatus::InvalidEvent,
                format!("Event {event} was already released or never acquired."),
            )),
        }
    }

    fn record_event(&self, event: EventId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let position = state.submitted;
        state.event(event)?.recorded = Some((position, Instant::now()));
        Ok(())
    }

    fn wait_for_event(&self, event: EventId) -> Result<(), BackendError> {
        // Single in-order stream, every later command already runs after the event
        self.state.lock().event(event)?;
        Ok(())
    }

    fn synchronize_event(&self, event: EventId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let recorded = state.event(event)?.recorded;
        if let Some((position, _)) = recorded {
            state.complete(position);
        }
        Ok(())
    }

    fn query_event(&self, event: EventId) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        let completed = state.completed;
        // Events that were never recorded count as reached
        Ok(state.event(event)?.recorded.map_or(true, |(position, _)| completed >= position))
    }

    fn elapsed_time_of_events(&self, start: EventId, end: EventId) -> Result<f64, BackendError> {
        let mut state = self.state.lock();
        let completed = state.completed;
        let mut timestamp = |event: EventId| -> Result<Instant, BackendError> {
            let ev = state.event(event)?;
            if !ev.timing {
                return Err(BackendError::new(
                    ErrorStatus::EventTiming,
                    format!("Event {event} was acquired without timing enabled."),
                ));
            }
            match ev.recorded {
                Some((position, at)) if completed >= position => Ok(at),
                Some(_) => Err(BackendError::new(ErrorStatus::EventTiming, format!("Event {event} was not reached yet."))),
                None => Err(BackendError::new(ErrorStatus::EventTiming, format!("Event {event} was never recorded."))),
            }
        };
        let start = timestamp(start)?;
        let end = timestamp(end)?;
        Ok(match end.checked_duration_since(start) {
            Some(elapsed) => elapsed.as_secs_f64() * 1000.0,
            None => -(start.duration_since(end).as_secs_f64() * 1000.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DummyDevice {
        DummyDevice::new(&DummyConfig { enabled: true, memory_bytes: Some(1000), seed: Some(5) })
    }

    #[test]
    fn generator_uses_configured_seed() {
        let dev = device();
        let generator = dev.default_generator().unwrap();
        assert_eq!(generator.current_seed(), 5);
        assert!(generator.same_as(&dev.default_generator().unwrap()));
    }

    #[test]
    fn cache_and_empty_cache() {
        let dev = device();
        dev.allocate(300).unwrap();
        dev.deallocate(100).unwrap();
        assert_eq!(dev.current_allocated_memory().unwrap(), 200);
        assert_eq!(dev.driver_allocated_memory().unwrap(), 300);
        dev.empty_cache().unwrap();
        assert_eq!(dev.driver_allocated_memory().unwrap(), 200);
        assert_eq!(dev.deallocate(500).unwrap_err().status, ErrorStatus::MemoryAllocation);
    }

    #[test]
    fn memory_fraction_limits_allocations() {
        let dev = device();
        dev.set_memory_fraction(0.5).unwrap();
        dev.allocate(400).unwrap();
        assert_eq!(dev.allocate(200).unwrap_err().status, ErrorStatus::MemoryAllocation);
        // Cache gets dropped before giving up
        dev.deallocate(400).unwrap();
        dev.allocate(450).unwrap();
        assert_eq!(dev.current_allocated_memory().unwrap(), 450);
        assert_eq!(dev.driver_allocated_memory().unwrap(), 450);
    }

    #[test]
    fn huge_allocation_fails_cleanly() {
        let dev = device();
        dev.allocate(100).unwrap();
        dev.deallocate(50).unwrap();
        assert_eq!(dev.allocate(u64::MAX).unwrap_err().status, ErrorStatus::MemoryAllocation);
        assert_eq!(dev.allocate(u64::MAX - 60).unwrap_err().status, ErrorStatus::MemoryAllocation);
        assert_eq!(dev.current_allocated_memory().unwrap(), 50);
    }

    #[test]
    fn rejected_fraction_keeps_old_value() {
        let dev = device();
        dev.set_memory_fraction(0.25).unwrap();
        assert_eq!(dev.set_memory_fraction(1.5).unwrap_err().status, ErrorStatus::InvalidValue);
        assert_eq!(dev.set_memory_fraction(f64::NAN).unwrap_err().status, ErrorStatus::InvalidValue);
        assert_eq!(dev.memory_fraction(), 0.25);
    }

    #[test]
    fn commit_does_not_complete() {
        let dev = device();
        dev.submit();
        dev.submit();
        dev.commit_stream().unwrap();
        assert_eq!(dev.stream_position(), (2, 2, 0));
        dev.device_synchronize().unwrap();
        assert_eq!(dev.stream_position(), (2, 2, 2));
    }

    #[test]
    fn event_reached_after_synchronize() {
        let dev = device();
        let event = dev.acquire_event(false).unwrap();
        assert!(dev.query_event(event).unwrap());
        dev.submit();
        dev.record_event(event).unwrap();
        assert!(!dev.query_event(event).unwrap());
        dev.synchronize_event(event).unwrap();
        assert!(dev.query_event(event).unwrap());
        dev.release_event(event).unwrap();
        assert_eq!(dev.release_event(event).unwrap_err().status, ErrorStatus::InvalidEvent);
        assert_eq!(dev.record_event(event).unwrap_err().status, ErrorStatus::InvalidEvent);
    }

    #[test]
    fn elapsed_time_needs_timing_and_completion() {
        let dev = device();
        let start = dev.acquire_event(true).unwrap();
        let end = dev.acquire_event(true).unwrap();
        let untimed = dev.acquire_event(false).unwrap();
        assert_ne!(start, end);
        dev.record_event(start).unwrap();
        dev.submit();
        dev.record_event(end).unwrap();
        dev.record_event(untimed).unwrap();
        assert_eq!(dev.elapsed_time_of_events(start, end).unwrap_err().status, ErrorStatus::EventTiming);
        dev.synchronize_event(end).unwrap();
        assert!(dev.elapsed_time_of_events(start, end).unwrap() >= 0.0);
        assert_eq!(dev.elapsed_time_of_events(start, untimed).unwrap_err().status, ErrorStatus::EventTiming);
    }

    #[test]
    fn profiler_session() {
        let dev = device();
        assert_eq!(dev.profiler_stop_trace().unwrap_err().status, ErrorStatus::Profiler);
        assert_eq!(dev.profiler_start_trace("", false).unwrap_err().status, ErrorStatus::Profiler);
        dev.submit();
        dev.profiler_start_trace("interval,event", true).unwrap();
        assert_eq!(dev.stream_position(), (1, 1, 1));
        assert!(dev.is_tracing());
        assert_eq!(dev.profiler_start_trace("event", false).unwrap_err().status, ErrorStatus::Profiler);
        dev.profiler_stop_trace().unwrap();
        assert!(!dev.is_tracing());
    }
}
