//! Binding dispatch table.
//!
//! Maps stable `_apu_*` names to handlers. Every call is validated against the handler's
//! arity and parameter kinds before anything else happens, then the fork policy is applied,
//! and only then the call is forwarded to the facade or directly to the hooks provider.
//! Provider errors are returned unchanged.

use std::sync::OnceLock;

use crate::backend::ApuHooks;
use crate::device::{is_available_with, is_built, synchronize_with};
use crate::error::ApuError;
use crate::fork::{is_in_bad_fork, track_bad_fork};
use crate::platform;
use crate::runtime;
use crate::value::Value;

/// How arguments are passed to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    NoArgs,
    /// Exactly one value, not wrapped in a tuple
    Single,
    /// Fixed size tuple of values
    Tuple,
}

/// Kind of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Unsigned 32 bit integer, bools are rejected
    U32,
    /// Float, integers are accepted
    Float,
    Bool,
    Str,
}

impl Param {
    fn check(self, value: &Value) -> Result<(), ApuError> {
        match self {
            Param::U32 => value.to_u32().map(|_| ()),
            Param::Float => value.to_f64().map(|_| ()),
            Param::Bool => value.to_bool().map(|_| ()),
            Param::Str => value.to_str().map(|_| ()),
        }
    }
}

/// What the handler does about processes forked after accelerator init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkPolicy {
    /// Does not touch accelerator state, works in any process
    Ignore,
    /// Registers the fork handler, but still answers in a bad fork
    Track,
    /// Registers the fork handler and fails with [`ApuError::BadFork`] in a bad fork
    Require,
}

/// Handler body. Queries never bind a provider, they only see the process one if it is already bound.
#[derive(Debug, Clone, Copy)]
enum HandlerFn {
    Query(fn(Option<&dyn ApuHooks>, &[Value]) -> Result<Value, ApuError>),
    Device(fn(&dyn ApuHooks, &[Value]) -> Result<Value, ApuError>),
}

// Where the hooks provider of a call comes from
#[derive(Clone, Copy)]
enum Provider<'h> {
    Process,
    Given(&'h dyn ApuHooks),
}

impl<'h> Provider<'h> {
    // Binds the process provider if needed
    fn resolve(self) -> &'h dyn ApuHooks {
        match self {
            Provider::Process => runtime::hooks(),
            Provider::Given(hooks) => hooks,
        }
    }

    fn bound(self) -> Option<&'h dyn ApuHooks> {
        match self {
            Provider::Process => runtime::bound_hooks(),
            Provider::Given(hooks) => Some(hooks),
        }
    }
}

/// Registry entry
#[derive(Debug, Clone, Copy)]
pub struct Handler {
    name: &'static str,
    style: CallStyle,
    params: &'static [Param],
    fork: ForkPolicy,
    func: HandlerFn,
}

impl Handler {
    const fn new(
        name: &'static str,
        style: CallStyle,
        params: &'static [Param],
        fork: ForkPolicy,
        func: HandlerFn,
    ) -> Handler {
        Handler { name, style, params, fork, func }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn style(&self) -> CallStyle {
        self.style
    }

    #[must_use]
    pub const fn params(&self) -> &'static [Param] {
        self.params
    }

    #[must_use]
    pub const fn fork_policy(&self) -> ForkPolicy {
        self.fork
    }

    fn validate(&self, args: &[Value]) -> Result<(), ApuError> {
        let expected = match self.style {
            CallStyle::NoArgs => 0,
            CallStyle::Single => 1,
            CallStyle::Tuple => self.params.len(),
        };
        if args.len() != expected {
            return Err(ApuError::argument_error(format!(
                "{}() takes {expected} argument{} ({} given)",
                self.name,
                if expected == 1 { "" } else { "s" },
                args.len()
            )));
        }
        for (i, (param, arg)) in self.params.iter().zip(args).enumerate() {
            param.check(arg).map_err(|e| ApuError::argument_error(format!("{}() argument {i}: {e}", self.name)))?;
        }
        Ok(())
    }

    fn apply_fork_policy(&self) -> Result<(), ApuError> {
        match self.fork {
            ForkPolicy::Ignore => Ok(()),
            ForkPolicy::Track => {
                track_bad_fork();
                Ok(())
            }
            ForkPolicy::Require => {
                track_bad_fork();
                if is_in_bad_fork() {
                    return Err(ApuError::BadFork);
                }
                Ok(())
            }
        }
    }

    fn dispatch(&self, args: &[Value], provider: Provider<'_>) -> Result<Value, ApuError> {
        if crate::debug().dispatch() {
            println!("{}{args:?}", self.name);
        }
        self.validate(args)?;
        self.apply_fork_policy()?;
        match self.func {
            HandlerFn::Query(func) => func(provider.bound(), args),
            HandlerFn::Device(func) => func(provider.resolve(), args),
        }
    }
}

/// Ordered, immutable table of all entry points
#[derive(Debug)]
pub struct FunctionRegistry {
    handlers: Vec<Handler>,
}

static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> FunctionRegistry {
        use CallStyle::{NoArgs, Single, Tuple};
        use ForkPolicy::{Ignore, Require, Track};
        use HandlerFn::{Device, Query};
        use Param::{Bool, Float, Str, U32};
        FunctionRegistry {
            handlers: vec![
                Handler::new("_apu_deviceSynchronize", NoArgs, &[], Require, Device(device_synchronize)),
                Handler::new("_apu_is_in_bad_fork", NoArgs, &[], Ignore, Query(|_, _| Ok(is_in_bad_fork().into()))),
                Handler::new(
                    "_apu_is_available",
                    NoArgs,
                    &[],
                    Track,
                    Device(|hooks, _| Ok(is_available_with(hooks).into())),
                ),
                Handler::new("_apu_is_built", NoArgs, &[], Ignore, Query(|_, _| Ok(is_built().into()))),
                Handler::new(
                    "_apu_is_on_macos_13_or_newer",
                    Single,
                    &[U32],
                    Ignore,
                    Query(|hooks, args| {
                        let minor = args[0].to_u32()?;
                        Ok(match hooks {
                            Some(hooks) => hooks.is_on_macos_13_or_newer(minor),
                            None => platform::is_macos_13_or_newer(minor),
                        }
                        .into())
                    }),
                ),
                Handler::new(
                    "_apu_get_default_generator",
                    NoArgs,
                    &[],
                    Require,
                    Device(|hooks, _| Ok(hooks.default_generator().into())),
                ),
                Handler::new(
                    "_apu_emptyCache",
                    NoArgs,
                    &[],
                    Require,
                    Device(|hooks, _| {
                        hooks.empty_cache()?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new("_apu_setMemoryFraction", Single, &[Float], Require, Device(set_memory_fraction)),
                Handler::new(
                    "_apu_currentAllocatedMemory",
                    NoArgs,
                    &[],
                    Require,
                    Device(|hooks, _| Ok(hooks.current_allocated_memory()?.into())),
                ),
                Handler::new(
                    "_apu_driverAllocatedMemory",
                    NoArgs,
                    &[],
                    Require,
                    Device(|hooks, _| Ok(hooks.driver_allocated_memory()?.into())),
                ),
                Handler::new(
                    "_apu_profilerStartTrace",
                    Tuple,
                    &[Str, Bool],
                    Require,
                    Device(|hooks, args| {
                        hooks.profiler_start_trace(args[0].to_str()?, args[1].to_bool()?)?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_profilerStopTrace",
                    NoArgs,
                    &[],
                    Require,
                    Device(|hooks, _| {
                        hooks.profiler_stop_trace()?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_acquireEvent",
                    Single,
                    &[Bool],
                    Require,
                    Device(|hooks, args| Ok(hooks.acquire_event(args[0].to_bool()?)?.into())),
                ),
                Handler::new(
                    "_apu_releaseEvent",
                    Single,
                    &[U32],
                    Require,
                    Device(|hooks, args| {
                        hooks.release_event(args[0].to_u32()?)?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_recordEvent",
                    Single,
                    &[U32],
                    Require,
                    Device(|hooks, args| {
                        hooks.record_event(args[0].to_u32()?)?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_waitForEvent",
                    Single,
                    &[U32],
                    Require,
                    Device(|hooks, args| {
                        hooks.wait_for_event(args[0].to_u32()?)?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_synchronizeEvent",
                    Single,
                    &[U32],
                    Require,
                    Device(|hooks, args| {
                        hooks.synchronize_event(args[0].to_u32()?)?;
                        Ok(Value::None)
                    }),
                ),
                Handler::new(
                    "_apu_queryEvent",
                    Single,
                    &[U32],
                    Require,
                    Device(|hooks, args| Ok(hooks.query_event(args[0].to_u32()?)?.into())),
                ),
                Handler::new(
                    "_apu_elapsedTimeOfEvents",
                    Tuple,
                    &[U32, U32],
                    Require,
                    Device(|hooks, args| {
                        Ok(hooks.elapsed_time_of_events(args[0].to_u32()?, args[1].to_u32()?)?.into())
                    }),
                ),
            ],
        }
    }

    /// Registry shared by the whole process, built on first use
    pub fn global() -> &'static FunctionRegistry {
        REGISTRY.get_or_init(FunctionRegistry::new)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.iter().find(|handler| handler.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|handler| handler.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Handler> {
        self.handlers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Calls entry point `name` on the process hooks provider.
    /// The provider is bound lazily, after the arguments were validated.
    /// Queries that do not touch the accelerator never bind it.
    ///
    /// # Errors
    /// [`ApuError::ArgumentError`] for unknown names or malformed arguments,
    /// [`ApuError::BadFork`] for accelerator calls in a bad fork,
    /// otherwise errors of the hooks provider.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ApuError> {
        self.handler(name)?.dispatch(args, Provider::Process)
    }

    /// Calls entry point `name` on the given hooks provider instead of the process one
    ///
    /// # Errors
    /// Same as [`FunctionRegistry::call`].
    pub fn call_with(&self, hooks: &dyn ApuHooks, name: &str, args: &[Value]) -> Result<Value, ApuError> {
        self.handler(name)?.dispatch(args, Provider::Given(hooks))
    }

    fn handler(&self, name: &str) -> Result<&Handler, ApuError> {
        self.get(name).ok_or_else(|| ApuError::argument_error(format!("Unknown APU function {name}")))
    }
}

fn device_synchronize(hooks: &dyn ApuHooks, _: &[Value]) -> Result<Value, ApuError> {
    synchronize_with(hooks)?;
    Ok(Value::None)
}

fn set_memory_fraction(hooks: &dyn ApuHooks, args: &[Value]) -> Result<Value, ApuError> {
    let fraction = args[0].to_f64()?;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ApuError::out_of_range(format!(
            "invalid fraction value {fraction}, expected a value in range [0, 1]"
        )));
    }
    hooks.set_memory_fraction(fraction)?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyConfig, DummyDevice, NoAccelerator};

    fn dummy() -> DummyDevice {
        DummyDevice::new(&DummyConfig::enabled())
    }

    #[test]
    fn registry_contains_all_entry_points() {
        let registry = FunctionRegistry::new();
        let names: Vec<&str> = registry.names().collect();
        for name in [
            "_apu_deviceSynchronize",
            "_apu_is_in_bad_fork",
            "_apu_is_available",
            "_apu_is_on_macos_13_or_newer",
            "_apu_get_default_generator",
            "_apu_emptyCache",
            "_apu_setMemoryFraction",
            "_apu_currentAllocatedMemory",
            "_apu_driverAllocatedMemory",
            "_apu_profilerStartTrace",
            "_apu_profilerStopTrace",
            "_apu_acquireEvent",
            "_apu_releaseEvent",
            "_apu_recordEvent",
            "_apu_waitForEvent",
            "_apu_synchronizeEvent",
            "_apu_queryEvent",
            "_apu_elapsedTimeOfEvents",
            "_apu_is_built",
        ] {
            assert!(names.contains(&name), "{name} is missing");
        }
        assert_eq!(registry.len(), 19);
        assert_eq!(registry.get("_apu_is_in_bad_fork").unwrap().fork_policy(), ForkPolicy::Ignore);
        assert_eq!(registry.get("_apu_is_available").unwrap().fork_policy(), ForkPolicy::Track);
        assert_eq!(registry.get("_apu_queryEvent").unwrap().fork_policy(), ForkPolicy::Require);
    }

    #[test]
    fn unknown_name_is_argument_error() {
        let dev = dummy();
        let err = FunctionRegistry::new().call_with(&dev, "_apu_manualSeed", &[Value::UInt(1)]).unwrap_err();
        assert!(matches!(err, ApuError::ArgumentError(_)));
    }

    #[test]
    fn arity_is_checked_before_forwarding() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.call_with(&dev, "_apu_deviceSynchronize", &[Value::None]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(
            registry.call_with(&dev, "_apu_elapsedTimeOfEvents", &[Value::UInt(1)]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(registry.call_with(&dev, "_apu_acquireEvent", &[]), Err(ApuError::ArgumentError(_))));
        // Nothing reached the device
        assert_eq!(dev.stream_position(), (0, 0, 0));
    }

    #[test]
    fn parameter_kinds_are_checked() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.call_with(&dev, "_apu_releaseEvent", &[Value::Bool(true)]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(
            registry.call_with(&dev, "_apu_releaseEvent", &[Value::Int(-1)]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(
            registry.call_with(&dev, "_apu_setMemoryFraction", &[Value::Bool(false)]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(
            registry.call_with(&dev, "_apu_acquireEvent", &[Value::Int(1)]),
            Err(ApuError::ArgumentError(_))
        ));
        assert!(matches!(
            registry.call_with(&dev, "_apu_profilerStartTrace", &[Value::Bool(true), Value::from("cpu")]),
            Err(ApuError::ArgumentError(_))
        ));
    }

    #[test]
    fn memory_fraction_out_of_range_has_no_effect() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        registry.call_with(&dev, "_apu_setMemoryFraction", &[Value::Float(0.25)]).unwrap();
        for fraction in [-0.1, 1.5, f64::NAN] {
            let err = registry.call_with(&dev, "_apu_setMemoryFraction", &[Value::Float(fraction)]).unwrap_err();
            assert!(matches!(err, ApuError::OutOfRange(_)));
        }
        assert_eq!(dev.memory_fraction(), 0.25);
        registry.call_with(&dev, "_apu_setMemoryFraction", &[Value::Int(1)]).unwrap();
        assert_eq!(dev.memory_fraction(), 1.0);
    }

    #[test]
    fn memory_queries() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        dev.allocate(1024).unwrap();
        dev.deallocate(256).unwrap();
        assert_eq!(registry.call_with(&dev, "_apu_currentAllocatedMemory", &[]).unwrap(), Value::UInt(768));
        assert_eq!(registry.call_with(&dev, "_apu_driverAllocatedMemory", &[]).unwrap(), Value::UInt(1024));
        assert_eq!(registry.call_with(&dev, "_apu_emptyCache", &[]).unwrap(), Value::None);
        assert_eq!(registry.call_with(&dev, "_apu_driverAllocatedMemory", &[]).unwrap(), Value::UInt(768));
    }

    #[test]
    fn event_lifecycle() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        let start = registry.call_with(&dev, "_apu_acquireEvent", &[Value::Bool(true)]).unwrap();
        let end = registry.call_with(&dev, "_apu_acquireEvent", &[Value::Bool(true)]).unwrap();
        registry.call_with(&dev, "_apu_recordEvent", &[start.clone()]).unwrap();
        dev.submit();
        registry.call_with(&dev, "_apu_recordEvent", &[end.clone()]).unwrap();
        registry.call_with(&dev, "_apu_waitForEvent", &[end.clone()]).unwrap();
        assert_eq!(registry.call_with(&dev, "_apu_queryEvent", &[end.clone()]).unwrap(), Value::Bool(false));
        registry.call_with(&dev, "_apu_synchronizeEvent", &[end.clone()]).unwrap();
        assert_eq!(registry.call_with(&dev, "_apu_queryEvent", &[end.clone()]).unwrap(), Value::Bool(true));
        let elapsed = registry.call_with(&dev, "_apu_elapsedTimeOfEvents", &[start.clone(), end.clone()]).unwrap();
        assert!(elapsed.as_f64().unwrap() >= 0.0);
        registry.call_with(&dev, "_apu_releaseEvent", &[start.clone()]).unwrap();
        let err = registry.call_with(&dev, "_apu_releaseEvent", &[start]).unwrap_err();
        assert!(matches!(err, ApuError::BackendError(_)));
    }

    #[test]
    fn profiler_trace() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        dev.submit();
        registry
            .call_with(&dev, "_apu_profilerStartTrace", &[Value::from("cpu"), Value::Bool(true)])
            .unwrap();
        assert_eq!(dev.stream_position(), (1, 1, 1));
        assert!(dev.is_tracing());
        registry.call_with(&dev, "_apu_profilerStopTrace", &[]).unwrap();
        assert!(!dev.is_tracing());
        assert!(registry.call_with(&dev, "_apu_profilerStopTrace", &[]).is_err());
    }

    #[test]
    fn default_generator_is_shared() {
        let dev = dummy();
        let registry = FunctionRegistry::new();
        let a = registry.call_with(&dev, "_apu_get_default_generator", &[]).unwrap();
        let b = registry.call_with(&dev, "_apu_get_default_generator", &[]).unwrap();
        assert_eq!(a, b);
        let none = registry.call_with(&NoAccelerator, "_apu_get_default_generator", &[]).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn no_accelerator_degrades() {
        let registry = FunctionRegistry::new();
        assert_eq!(registry.call_with(&NoAccelerator, "_apu_deviceSynchronize", &[]).unwrap(), Value::None);
        assert_eq!(registry.call_with(&NoAccelerator, "_apu_emptyCache", &[]).unwrap(), Value::None);
        assert_eq!(registry.call_with(&NoAccelerator, "_apu_currentAllocatedMemory", &[]).unwrap(), Value::UInt(0));
        assert_eq!(
            registry.call_with(&NoAccelerator, "_apu_is_available", &[]).unwrap(),
            Value::Bool(cfg!(feature = "assume-available"))
        );
        assert!(matches!(
            registry.call_with(&NoAccelerator, "_apu_acquireEvent", &[Value::Bool(false)]),
            Err(ApuError::NoBackendAvailable)
        ));
    }

    #[test]
    fn handler_shapes_are_consistent() {
        let registry = FunctionRegistry::new();
        for handler in registry.iter() {
            let arity = handler.params().len();
            match handler.style() {
                CallStyle::NoArgs => assert_eq!(arity, 0, "{}", handler.name()),
                CallStyle::Single => assert_eq!(arity, 1, "{}", handler.name()),
                CallStyle::Tuple => assert!(arity >= 2, "{}", handler.name()),
            }
            // Only queries may skip the fork policy, they must not bind a provider either
            let is_query = matches!(handler.func, HandlerFn::Query(_));
            assert_eq!(is_query, handler.fork_policy() == ForkPolicy::Ignore, "{}", handler.name());
        }
    }
}
