//! Hooks providers. This file defines the capability interface every accelerator backend
//! implements, and selects which implementation gets bound to the process.
//! Everything heavier than forwarding (device memory, streams, events, the generator)
//! is owned by the provider and only referenced through ids or handles.

use std::path::Path;

use crate::error::{ApuError, BackendError};
use crate::generator::Generator;
use crate::DebugMask;
use nanoserde::DeJson;

pub use dummy::{DummyConfig, DummyDevice};
#[cfg(feature = "hip")]
pub use hip::HIPDevice;
pub use none::NoAccelerator;

mod dummy;
#[cfg(feature = "hip")]
mod hip;
mod none;

/// Opaque accelerator timing event id. Interpreted only by the provider that issued it.
pub type EventId = u32;

/// Capability interface of an accelerator backend.
///
/// All calls are synchronous. Blocking calls (`device_synchronize`, `synchronize_event`,
/// `profiler_start_trace` with `wait_until_completed`) suspend the calling thread until
/// the device-side condition holds. Errors are returned to callers unchanged.
pub trait ApuHooks: Send + Sync {
    /// Short provider name used in diagnostics
    fn name(&self) -> &'static str;

    /// Is there an accelerator behind this provider?
    fn has_apu(&self) -> bool;

    fn is_on_macos_13_or_newer(&self, minor: u32) -> bool {
        crate::platform::is_macos_13_or_newer(minor)
    }

    /// Default per-device generator, None if there is no device
    fn default_generator(&self) -> Option<Generator>;

    /// Blocks until all outstanding work on the device is completed
    fn device_synchronize(&self) -> Result<(), BackendError>;

    /// Flushes pending commands to the device without waiting for completion
    fn commit_stream(&self) -> Result<(), BackendError>;

    /// Releases cached, but unused device memory
    fn empty_cache(&self) -> Result<(), BackendError>;

    /// Maximum fraction of device memory this process may allocate, in [0, 1]
    fn set_memory_fraction(&self, fraction: f64) -> Result<(), BackendError>;

    /// Bytes currently allocated by this process
    fn current_allocated_memory(&self) -> Result<u64, BackendError>;

    /// Bytes reserved by the driver, including cached allocations
    fn driver_allocated_memory(&self) -> Result<u64, BackendError>;

    fn profiler_start_trace(&self, mode: &str, wait_until_completed: bool) -> Result<(), BackendError>;

    fn profiler_stop_trace(&self) -> Result<(), BackendError>;

    fn acquire_event(&self, enable_timing: bool) -> Result<EventId, BackendError>;

    fn release_event(&self, event: EventId) -> Result<(), BackendError>;

    /// Marks the event at the current position in the command stream
    fn record_event(&self, event: EventId) -> Result<(), BackendError>;

    /// Makes the stream wait until the event's recorded position is reached
    fn wait_for_event(&self, event: EventId) -> Result<(), BackendError>;

    /// Blocks the calling thread until the event is reached
    fn synchronize_event(&self, event: EventId) -> Result<(), BackendError>;

    /// Non-blocking check whether the event was reached
    fn query_event(&self, event: EventId) -> Result<bool, BackendError>;

    /// Milliseconds between two timing-enabled events
    fn elapsed_time_of_events(&self, start: EventId, end: EventId) -> Result<f64, BackendError>;
}

/// Backend configuration, read from apu/backend_config.json
#[derive(DeJson, Debug, Default)]
pub struct Config {
    /// Configuration of dummy device for testing
    #[nserde(default)]
    pub dummy: DummyConfig,
    /// HIP configuration, ignored in builds without the hip feature
    #[nserde(default)]
    pub hip: HIPConfig,
}

impl Config {
    /// Reads config from a json file, missing fields get their defaults.
    ///
    /// # Errors
    /// [`ApuError::IOError`] if the file can not be read,
    /// [`ApuError::ParseError`] if it is not a valid config.
    pub fn from_file(path: &Path) -> Result<Config, ApuError> {
        let file = std::fs::read_to_string(path)?;
        Config::deserialize_json(&file)
            .map_err(|e| ApuError::ParseError(format!("{}: {e}", path.display()).into()))
    }
}

/// HIP configuration
#[derive(DeJson, Debug, Default, Clone)]
pub struct HIPConfig {
    /// Set to false to skip loading the HIP runtime
    #[nserde(default)]
    pub enabled: Option<bool>,
    /// Device to bind, defaults to the first one
    #[nserde(default)]
    pub device_id: Option<i32>,
    /// Additional paths searched for libamdhip64, before the system ones
    #[nserde(default)]
    pub library_paths: Option<Vec<String>>,
}

impl HIPConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Backend explicitly requested through `APU_BACKEND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    None,
    Dummy,
    HIP,
}

impl BackendKind {
    pub(crate) fn parse(name: &str) -> Option<BackendKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "cpu" => Some(BackendKind::None),
            "dummy" => Some(BackendKind::Dummy),
            "hip" => Some(BackendKind::HIP),
            _ => None,
        }
    }
}

/// Picks the hooks provider for this process. Never fails, the last resort is [`NoAccelerator`].
pub(crate) fn initialize_backend(
    config: &Config,
    requested: Option<BackendKind>,
    debug: DebugMask,
) -> Box<dyn ApuHooks> {
    let debug_backend = debug.backend();
    let order: &[BackendKind] = match requested {
        Some(BackendKind::None) => &[],
        Some(BackendKind::Dummy) => &[BackendKind::Dummy],
        Some(BackendKind::HIP) => &[BackendKind::HIP],
        None => &[BackendKind::HIP, BackendKind::Dummy],
    };
    for kind in order {
        let hooks: Result<Box<dyn ApuHooks>, BackendError> = match kind {
            BackendKind::None => continue,
            BackendKind::Dummy => {
                // An explicit request enables the dummy device even if config did not
                let enabled = config.dummy.enabled || requested == Some(BackendKind::Dummy);
                if enabled {
                    Ok(Box::new(DummyDevice::new(&config.dummy)))
                } else {
                    Err(BackendError::new(crate::error::ErrorStatus::Initialization, "Configured out."))
                }
            }
            #[cfg(feature = "hip")]
            BackendKind::HIP => hip::initialize_device(&config.hip, debug_backend)
                .map(|dev| Box::new(dev) as Box<dyn ApuHooks>),
            #[cfg(not(feature = "hip"))]
            BackendKind::HIP => {
                Err(BackendError::new(crate::error::ErrorStatus::Initialization, "Built without HIP support."))
            }
        };
        match hooks {
            Ok(hooks) => {
                if debug_backend {
                    println!("Using {} APU backend", hooks.name());
                }
                return hooks;
            }
            Err(err) => {
                if debug_backend {
                    println!("{kind:?} backend failed to initialize, {err}");
                }
            }
        }
    }
    if debug_backend {
        println!("No APU backend available, all accelerator calls will be no-ops.");
    }
    Box::new(NoAccelerator)
}
