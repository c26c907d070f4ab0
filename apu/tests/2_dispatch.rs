use apu::{ApuError, DummyConfig, DummyDevice, FunctionRegistry, Value};

fn registry() -> &'static FunctionRegistry {
    let _ = apu::bind_hooks(Box::new(DummyDevice::new(&DummyConfig::enabled())));
    FunctionRegistry::global()
}

#[test]
fn event_timing() -> Result<(), ApuError> {
    let registry = registry();
    let start = registry.call("_apu_acquireEvent", &[Value::Bool(true)])?;
    let end = registry.call("_apu_acquireEvent", &[Value::Bool(true)])?;
    assert_ne!(start, end);
    registry.call("_apu_recordEvent", &[start.clone()])?;
    registry.call("_apu_deviceSynchronize", &[])?;
    registry.call("_apu_recordEvent", &[end.clone()])?;
    registry.call("_apu_synchronizeEvent", &[end.clone()])?;
    assert_eq!(registry.call("_apu_queryEvent", &[end.clone()])?, Value::Bool(true));
    let elapsed = registry.call("_apu_elapsedTimeOfEvents", &[start.clone(), end.clone()])?;
    assert!(elapsed.as_f64().is_some_and(|ms| ms >= 0.0));
    registry.call("_apu_releaseEvent", &[start])?;
    registry.call("_apu_releaseEvent", &[end])?;
    Ok(())
}

#[test]
fn elapsed_time_without_timing_fails() -> Result<(), ApuError> {
    let registry = registry();
    let start = registry.call("_apu_acquireEvent", &[Value::Bool(false)])?;
    let end = registry.call("_apu_acquireEvent", &[Value::Bool(true)])?;
    registry.call("_apu_recordEvent", &[start.clone()])?;
    registry.call("_apu_recordEvent", &[end.clone()])?;
    registry.call("_apu_synchronizeEvent", &[end.clone()])?;
    let err = registry.call("_apu_elapsedTimeOfEvents", &[start, end]).unwrap_err();
    assert!(matches!(err, ApuError::BackendError(e) if e.status == apu::ErrorStatus::EventTiming));
    Ok(())
}

#[test]
fn double_release_propagates_provider_error() -> Result<(), ApuError> {
    let registry = registry();
    let event = registry.call("_apu_acquireEvent", &[Value::Bool(false)])?;
    registry.call("_apu_releaseEvent", &[event.clone()])?;
    let err = registry.call("_apu_releaseEvent", &[event]).unwrap_err();
    assert!(matches!(err, ApuError::BackendError(e) if e.status == apu::ErrorStatus::InvalidEvent));
    Ok(())
}

#[test]
fn profiler_start_stop_without_work() -> Result<(), ApuError> {
    let registry = registry();
    assert_eq!(registry.call("_apu_profilerStartTrace", &[Value::from("cpu"), Value::Bool(true)])?, Value::None);
    assert!(registry.call("_apu_profilerStartTrace", &[Value::from("cpu"), Value::Bool(false)]).is_err());
    assert_eq!(registry.call("_apu_profilerStopTrace", &[])?, Value::None);
    Ok(())
}

#[test]
fn memory_fraction_range() -> Result<(), ApuError> {
    let registry = registry();
    assert!(matches!(
        registry.call("_apu_setMemoryFraction", &[Value::Float(1.01)]),
        Err(ApuError::OutOfRange(_))
    ));
    assert!(matches!(
        registry.call("_apu_setMemoryFraction", &[Value::from("half")]),
        Err(ApuError::ArgumentError(_))
    ));
    registry.call("_apu_setMemoryFraction", &[Value::Float(1.0)])?;
    let allocated = registry.call("_apu_currentAllocatedMemory", &[])?.as_u64().unwrap_or(u64::MAX);
    let reserved = registry.call("_apu_driverAllocatedMemory", &[])?.as_u64().unwrap_or(0);
    assert!(reserved >= allocated);
    Ok(())
}

#[test]
fn platform_query_answers() -> Result<(), ApuError> {
    let registry = registry();
    let newer = registry.call("_apu_is_on_macos_13_or_newer", &[Value::UInt(0)])?;
    if cfg!(target_os = "macos") {
        assert_eq!(newer, Value::Bool(apu::macos_version().is_some_and(|(major, _)| major >= 13)));
    } else {
        assert_eq!(newer, Value::Bool(false));
    }
    assert!(registry.call("_apu_is_on_macos_13_or_newer", &[Value::Int(-3)]).is_err());
    Ok(())
}
