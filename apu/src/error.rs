use std::fmt::Display;

/// Enumeration representing the various errors that can occur within the apu shim.
#[derive(Debug)]
pub enum ApuError {
    /// Wrong type or number of arguments passed to an entry point
    ArgumentError(Box<str>),
    /// Argument has the right type, but its value is outside of the accepted range
    OutOfRange(Box<str>),
    /// Operation requires an accelerator, but no hooks provider is bound
    NoBackendAvailable,
    /// Accelerator was touched in a child forked after the accelerator was initialized
    BadFork,
    /// Hooks provider can only be bound before the runtime is initialized
    AlreadyInitialized,
    /// Error parsing some data
    ParseError(Box<str>),
    /// Error from file operations
    IOError(std::io::Error),
    /// Error returned by the hooks provider
    BackendError(BackendError),
}

impl ApuError {
    /// Argument error
    pub fn argument_error(e: impl Into<String>) -> Self {
        Self::ArgumentError(e.into().into())
    }

    /// Out of range error
    pub fn out_of_range(e: impl Into<String>) -> Self {
        Self::OutOfRange(e.into().into())
    }
}

impl std::fmt::Display for ApuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApuError::ArgumentError(e) => f.write_str(e),
            ApuError::OutOfRange(e) => f.write_str(e),
            ApuError::NoBackendAvailable => f.write_str("No available APU backend"),
            ApuError::BadFork => f.write_str(
                "Cannot re-initialize APU in forked subprocess. The APU was initialized by the parent process.",
            ),
            ApuError::AlreadyInitialized => f.write_str("APU runtime is already initialized"),
            ApuError::ParseError(e) => f.write_fmt(format_args!("Parse {e}")),
            ApuError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
            ApuError::BackendError(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for ApuError {}

impl From<std::io::Error> for ApuError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

/// Error returned by hooks providers, passed through to callers unchanged.
#[derive(Debug)]
pub struct BackendError {
    pub status: ErrorStatus,
    pub context: Box<str>,
}

impl BackendError {
    pub(crate) fn new(status: ErrorStatus, context: impl Into<String>) -> Self {
        Self { status, context: context.into().into() }
    }
}

impl From<BackendError> for ApuError {
    fn from(value: BackendError) -> Self {
        match value.status {
            ErrorStatus::NoDevice => ApuError::NoBackendAvailable,
            _ => ApuError::BackendError(value),
        }
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.status, self.context))
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Bound provider has no device to run the operation on
    NoDevice,
    /// Failed to enumerate devices
    DeviceEnumeration,
    /// Failed to query device for information
    DeviceQuery,
    /// Failed to wait for the device to become idle
    DeviceSync,
    /// Failed to flush pending commands to the device
    StreamCommit,
    /// Failed to query memory usage
    MemoryQuery,
    /// Failed to release cached memory
    MemoryRelease,
    /// Failed to allocate memory
    MemoryAllocation,
    /// Value passed to the provider is not accepted by it
    InvalidValue,
    /// Event id is not known to the provider
    InvalidEvent,
    /// Failed to create event
    EventCreation,
    /// Failed to record event into the stream
    EventRecord,
    /// Failed to wait for event
    EventSync,
    /// Failed to query event status
    EventQuery,
    /// Failed to measure time between events
    EventTiming,
    /// Profiler could not be started or stopped
    Profiler,
}
