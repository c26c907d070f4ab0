//! HIP backend

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use std::collections::BTreeMap;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;
use std::time::Instant;

use libloading::Library;

use super::{ApuHooks, EventId, HIPConfig};
use crate::error::{BackendError, ErrorStatus};
use crate::generator::{Generator, DEFAULT_SEED};
use crate::mutex::Mutex;

const hipEventDisableTiming: c_uint = 0x2;
const hipMemPoolAttrUsedMemCurrent: c_int = 0x7;

pub struct HIPDevice {
    device: c_int,
    total_bytes: usize,
    generator: Generator,
    state: Mutex<HIPState, 1_000_000>,
    hipSetDevice: unsafe extern "C" fn(c_int) -> HIPStatus,
    hipDeviceSynchronize: unsafe extern "C" fn() -> HIPStatus,
    hipStreamQuery: unsafe extern "C" fn(HIPstream) -> HIPStatus,
    hipMemGetInfo: unsafe extern "C" fn(*mut usize, *mut usize) -> HIPStatus,
    hipDeviceGetDefaultMemPool: unsafe extern "C" fn(*mut HIPmemPool, c_int) -> HIPStatus,
    hipMemPoolTrimTo: unsafe extern "C" fn(HIPmemPool, usize) -> HIPStatus,
    hipMemPoolGetAttribute: unsafe extern "C" fn(HIPmemPool, c_int, *mut c_void) -> HIPStatus,
    hipProfilerStart: unsafe extern "C" fn() -> HIPStatus,
    hipProfilerStop: unsafe extern "C" fn() -> HIPStatus,
    hipEventCreateWithFlags: unsafe extern "C" fn(*mut HIPevent, c_uint) -> HIPStatus,
    hipEventRecord: unsafe extern "C" fn(HIPevent, HIPstream) -> HIPStatus,
    hipStreamWaitEvent: unsafe extern "C" fn(HIPstream, HIPevent, c_uint) -> HIPStatus,
    hipEventSynchronize: unsafe extern "C" fn(HIPevent) -> HIPStatus,
    hipEventQuery: unsafe extern "C" fn(HIPevent) -> HIPStatus,
    hipEventElapsedTime: unsafe extern "C" fn(*mut f32, HIPevent, HIPevent) -> HIPStatus,
    hipEventDestroy: unsafe extern "C" fn(HIPevent) -> HIPStatus,
    // Must outlive all the function pointers above
    _hip: Library,
}

#[derive(Debug)]
struct HIPState {
    memory_fraction: f64,
    events: BTreeMap<EventId, HIPEvent>,
    next_event: EventId,
    trace: Option<(Box<str>, Instant)>,
}

impl HIPState {
    fn new() -> HIPState {
        HIPState { memory_fraction: 1.0, events: BTreeMap::new(), next_event: 1, trace: None }
    }

    // Check and store happen under one lock, so only one caller can start a trace
    fn claim_trace(&mut self, mode: &str) -> Result<(), BackendError> {
        if let Some((running, _)) = &self.trace {
            return Err(BackendError::new(
                ErrorStatus::Profiler,
                format!("Profiler trace in mode {running:?} is already running."),
            ));
        }
        self.trace = Some((mode.into(), Instant::now()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct HIPEvent {
    event: HIPevent,
    timing: bool,
}

// HIP handles are usable from any thread once the device is set on it
unsafe impl Send for HIPDevice {}
unsafe impl Sync for HIPDevice {}
unsafe impl Send for HIPState {}

impl std::fmt::Debug for HIPDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HIPDevice")
            .field("device", &self.device)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

unsafe fn load<T: Copy>(hip: &Library, name: &[u8]) -> Result<T, BackendError> {
    unsafe { hip.get::<T>(name) }.map(|symbol| *symbol).map_err(|err| {
        BackendError::new(
            ErrorStatus::DyLibNotFound,
            format!("HIP symbol {} not found, {err}", String::from_utf8_lossy(&name[..name.len() - 1])),
        )
    })
}

pub(super) fn initialize_device(config: &HIPConfig, debug_dev: bool) -> Result<HIPDevice, BackendError> {
    if !config.is_enabled() {
        return Err(BackendError::new(ErrorStatus::Initialization, "Configured out."));
    }

    let mut hip_paths: Vec<String> = config.library_paths.clone().unwrap_or_default();
    if cfg!(target_os = "windows") {
        hip_paths.push("amdhip64.dll".into());
    } else {
        hip_paths.extend(
            [
                "libamdhip64.so",
                "/opt/rocm/lib/libamdhip64.so",
                "/lib64/libamdhip64.so",
                "/lib/x86_64-linux-gnu/libamdhip64.so",
            ]
            .map(String::from),
        );
    }
    let hip = hip_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
    let Some(hip) = hip else {
        return Err(BackendError::new(ErrorStatus::DyLibNotFound, "HIP runtime not found."));
    };

    let hipInit: unsafe extern "C" fn(c_uint) -> HIPStatus = unsafe { load(&hip, b"hipInit\0") }?;
    let hipDriverGetVersion: unsafe extern "C" fn(*mut c_int) -> HIPStatus =
        unsafe { load(&hip, b"hipDriverGetVersion\0") }?;
    let hipGetDeviceCount: unsafe extern "C" fn(*mut c_int) -> HIPStatus =
        unsafe { load(&hip, b"hipGetDeviceCount\0") }?;
    let hipDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, c_int) -> HIPStatus =
        unsafe { load(&hip, b"hipDeviceGetName\0") }?;
    let hipDeviceTotalMem: unsafe extern "C" fn(*mut usize, c_int) -> HIPStatus =
        unsafe { load(&hip, b"hipDeviceTotalMem\0") }?;

    unsafe { hipInit(0) }.check(ErrorStatus::Initialization)?;
    let mut driver_version = 0;
    unsafe { hipDriverGetVersion(&mut driver_version) }.check(ErrorStatus::Initialization)?;
    let mut num_devices = 0;
    unsafe { hipGetDeviceCount(&mut num_devices) }.check(ErrorStatus::DeviceEnumeration)?;
    if num_devices == 0 {
        return Err(BackendError::new(ErrorStatus::DeviceEnumeration, "HIP no devices found."));
    }
    let device = config.device_id.unwrap_or(0);
    if !(0..num_devices).contains(&device) {
        return Err(BackendError::new(
            ErrorStatus::DeviceEnumeration,
            format!("HIP device {device} requested, but only {num_devices} devices are available."),
        ));
    }

    let mut total_bytes = 0;
    unsafe { hipDeviceTotalMem(&mut total_bytes, device) }.check(ErrorStatus::DeviceQuery)?;
    if debug_dev {
        let mut device_name = [0 as c_char; 100];
        unsafe { hipDeviceGetName(device_name.as_mut_ptr(), 100, device) }.check(ErrorStatus::DeviceQuery)?;
        println!(
            "Using HIP runtime, driver version: {}.{} on device {device} {:?}, {} MiB",
            driver_version / 1000,
            (driver_version - (driver_version / 1000 * 1000)) / 10,
            unsafe { std::ffi::CStr::from_ptr(device_name.as_ptr()) },
            total_bytes / 1024 / 1024,
        );
    }

    let dev = HIPDevice {
        device,
        total_bytes,
        generator: Generator::new(DEFAULT_SEED),
        state: Mutex::new(HIPState::new()),
        hipSetDevice: unsafe { load(&hip, b"hipSetDevice\0") }?,
        hipDeviceSynchronize: unsafe { load(&hip, b"hipDeviceSynchronize\0") }?,
        hipStreamQuery: unsafe { load(&hip, b"hipStreamQuery\0") }?,
        hipMemGetInfo: unsafe { load(&hip, b"hipMemGetInfo\0") }?,
        hipDeviceGetDefaultMemPool: unsafe { load(&hip, b"hipDeviceGetDefaultMemPool\0") }?,
        hipMemPoolTrimTo: unsafe { load(&hip, b"hipMemPoolTrimTo\0") }?,
        hipMemPoolGetAttribute: unsafe { load(&hip, b"hipMemPoolGetAttribute\0") }?,
        hipProfilerStart: unsafe { load(&hip, b"hipProfilerStart\0") }?,
        hipProfilerStop: unsafe { load(&hip, b"hipProfilerStop\0") }?,
        hipEventCreateWithFlags: unsafe { load(&hip, b"hipEventCreateWithFlags\0") }?,
        hipEventRecord: unsafe { load(&hip, b"hipEventRecord\0") }?,
        hipStreamWaitEvent: unsafe { load(&hip, b"hipStreamWaitEvent\0") }?,
        hipEventSynchronize: unsafe { load(&hip, b"hipEventSynchronize\0") }?,
        hipEventQuery: unsafe { load(&hip, b"hipEventQuery\0") }?,
        hipEventElapsedTime: unsafe { load(&hip, b"hipEventElapsedTime\0") }?,
        hipEventDestroy: unsafe { load(&hip, b"hipEventDestroy\0") }?,
        _hip: hip,
    };
    dev.activate()?;
    Ok(dev)
}

impl HIPDevice {
    // Current device is per thread in HIP
    fn activate(&self) -> Result<(), BackendError> {
        unsafe { (self.hipSetDevice)(self.device) }.check(ErrorStatus::Initialization)
    }

    fn memory_pool(&self) -> Result<HIPmemPool, BackendError> {
        let mut pool = ptr::null_mut();
        unsafe { (self.hipDeviceGetDefaultMemPool)(&mut pool, self.device) }.check(ErrorStatus::MemoryQuery)?;
        Ok(pool)
    }

    fn event(&self, event: EventId) -> Result<HIPEvent, BackendError> {
        self.state
            .lock()
            .events
            .get(&event)
            .copied()
            .ok_or_else(|| BackendError::new(ErrorStatus::InvalidEvent, format!("Event {event} does not exist.")))
    }

    #[must_use]
    pub fn memory_fraction(&self) -> f64 {
        self.state.lock().memory_fraction
    }
}

impl ApuHooks for HIPDevice {
    fn name(&self) -> &'static str {
        "hip"
    }

    fn has_apu(&self) -> bool {
        true
    }

    fn default_generator(&self) -> Option<Generator> {
        Some(self.generator.clone())
    }

    fn device_synchronize(&self) -> Result<(), BackendError> {
        self.activate()?;
        unsafe { (self.hipDeviceSynchronize)() }.check(ErrorStatus::DeviceSync)
    }

    fn commit_stream(&self) -> Result<(), BackendError> {
        self.activate()?;
        // Querying the null stream flushes its pending work to the device
        let status = unsafe { (self.hipStreamQuery)(ptr::null_mut()) };
        if status == HIPStatus::hipErrorNotReady {
            return Ok(());
        }
        status.check(ErrorStatus::StreamCommit)
    }

    fn empty_cache(&self) -> Result<(), BackendError> {
        self.activate()?;
        let pool = self.memory_pool()?;
        unsafe { (self.hipMemPoolTrimTo)(pool, 0) }.check(ErrorStatus::MemoryRelease)
    }

    fn set_memory_fraction(&self, fraction: f64) -> Result<(), BackendError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(BackendError::new(
                ErrorStatus::InvalidValue,
                format!("Memory fraction {fraction} is outside of [0, 1]."),
            ));
        }
        // HIP has no per-process cap, the fraction is kept for allocators built on top
        self.state.lock().memory_fraction = fraction;
        Ok(())
    }

    fn current_allocated_memory(&self) -> Result<u64, BackendError> {
        self.activate()?;
        let pool = self.memory_pool()?;
        let mut used: u64 = 0;
        unsafe {
            (self.hipMemPoolGetAttribute)(pool, hipMemPoolAttrUsedMemCurrent, ptr::addr_of_mut!(used).cast())
        }
        .check(ErrorStatus::MemoryQuery)?;
        Ok(used)
    }

    fn driver_allocated_memory(&self) -> Result<u64, BackendError> {
        self.activate()?;
        let mut free = 0;
        let mut total = 0;
        unsafe { (self.hipMemGetInfo)(&mut free, &mut total) }.check(ErrorStatus::MemoryQuery)?;
        Ok(total.saturating_sub(free) as u64)
    }

    fn profiler_start_trace(&self, mode: &str, wait_until_completed: bool) -> Result<(), BackendError> {
        if mode.trim().is_empty() {
            return Err(BackendError::new(ErrorStatus::Profiler, "Profiler mode must not be empty."));
        }
        self.state.lock().claim_trace(mode)?;
        let started = self.activate().and_then(|()| {
            if wait_until_completed {
                unsafe { (self.hipDeviceSynchronize)() }.check(ErrorStatus::DeviceSync)?;
            }
            unsafe { (self.hipProfilerStart)() }.check(ErrorStatus::Profiler)
        });
        if let Err(err) = started {
            self.state.lock().trace = None;
            return Err(err);
        }
        if crate::debug().profiler() {
            println!("HIP profiler trace {mode:?} started");
        }
        Ok(())
    }

    fn profiler_stop_trace(&self) -> Result<(), BackendError> {
        let Some((mode, started)) = self.state.lock().trace.take() else {
            return Err(BackendError::new(ErrorStatus::Profiler, "No profiler trace is running."));
        };
        self.activate()?;
        unsafe { (self.hipProfilerStop)() }.check(ErrorStatus::Profiler)?;
        if crate::debug().profiler() {
            println!("HIP profiler trace {mode:?} stopped after {:?}", started.elapsed());
        }
        Ok(())
    }

    fn acquire_event(&self, enable_timing: bool) -> Result<EventId, BackendError> {
        self.activate()?;
        let flags = if enable_timing { 0 } else { hipEventDisableTiming };
        let mut event = ptr::null_mut();
        unsafe { (self.hipEventCreateWithFlags)(&mut event, flags) }.check(ErrorStatus::EventCreation)?;
        let mut state = self.state.lock();
        let id = state.next_event;
        let Some(next) = id.checked_add(1) else {
            drop(state);
            unsafe { (self.hipEventDestroy)(event) };
            return Err(BackendError::new(ErrorStatus::EventCreation, "Ran out of event ids."));
        };
        state.next_event = next;
        state.events.insert(id, HIPEvent { event, timing: enable_timing });
        Ok(id)
    }

    fn release_event(&self, event: EventId) -> Result<(), BackendError> {
        let Some(HIPEvent { event, .. }) = self.state.lock().events.remove(&event) else {
            return Err(BackendError::new(
                ErrorStatus::InvalidEvent,
                format!("Event {event} was already released or never acquired."),
            ));
        };
        unsafe { (self.hipEventDestroy)(event) }.check(ErrorStatus::InvalidEvent)
    }

    fn record_event(&self, event: EventId) -> Result<(), BackendError> {
        let HIPEvent { event, .. } = self.event(event)?;
        self.activate()?;
        unsafe { (self.hipEventRecord)(event, ptr::null_mut()) }.check(ErrorStatus::EventRecord)
    }

    fn wait_for_event(&self, event: EventId) -> Result<(), BackendError> {
        let HIPEvent { event, .. } = self.event(event)?;
        self.activate()?;
        unsafe { (self.hipStreamWaitEvent)(ptr::null_mut(), event, 0) }.check(ErrorStatus::EventSync)
    }

    fn synchronize_event(&self, event: EventId) -> Result<(), BackendError> {
        // Lock is not held while blocking
        let HIPEvent { event, .. } = self.event(event)?;
        unsafe { (self.hipEventSynchronize)(event) }.check(ErrorStatus::EventSync)
    }

    fn query_event(&self, event: EventId) -> Result<bool, BackendError> {
        let HIPEvent { event, .. } = self.event(event)?;
        let status = unsafe { (self.hipEventQuery)(event) };
        if status == HIPStatus::hipErrorNotReady {
            return Ok(false);
        }
        status.check(ErrorStatus::EventQuery)?;
        Ok(true)
    }

    fn elapsed_time_of_events(&self, start: EventId, end: EventId) -> Result<f64, BackendError> {
        let start = self.event(start)?;
        let end = self.event(end)?;
        if !start.timing || !end.timing {
            return Err(BackendError::new(ErrorStatus::EventTiming, "Both events need timing enabled."));
        }
        let mut ms = 0f32;
        unsafe { (self.hipEventElapsedTime)(&mut ms, start.event, end.event) }.check(ErrorStatus::EventTiming)?;
        Ok(f64::from(ms))
    }
}

impl Drop for HIPDevice {
    fn drop(&mut self) {
        for (_, HIPEvent { event, .. }) in std::mem::take(&mut self.state.lock().events) {
            unsafe { (self.hipEventDestroy)(event) };
        }
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct HIPStatus(c_int);

impl HIPStatus {
    const hipSuccess: HIPStatus = HIPStatus(0);
    const hipErrorNotReady: HIPStatus = HIPStatus(600);

    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::hipSuccess {
            Ok(())
        } else {
            Err(BackendError::new(
                status,
                format!("HIP error code {}. Try rerunning with env var AMD_LOG_LEVEL=2", self.0),
            ))
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct HIPstream_st {
    _unused: [u8; 0],
}
type HIPstream = *mut HIPstream_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct HIPevent_st {
    _unused: [u8; 0],
}
type HIPevent = *mut HIPevent_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct HIPmemPool_st {
    _unused: [u8; 0],
}
type HIPmemPool = *mut HIPmemPool_st;
