use apu::{ApuError, DummyConfig, DummyDevice, FunctionRegistry, Value};

// Only test in this file, so nothing else binds the runtime first
#[test]
fn flag_queries_leave_runtime_unbound() -> Result<(), ApuError> {
    let registry = FunctionRegistry::global();
    assert_eq!(registry.call("_apu_is_in_bad_fork", &[])?, Value::Bool(false));
    assert_eq!(registry.call("_apu_is_built", &[])?, Value::Bool(cfg!(feature = "hip")));
    assert_eq!(
        registry.call("_apu_is_on_macos_13_or_newer", &[Value::UInt(0)])?.as_bool(),
        Some(apu::macos_version().is_some_and(|(major, _)| major >= 13))
    );
    assert!(!apu::is_tracking_forks());

    apu::bind_hooks(Box::new(DummyDevice::new(&DummyConfig::enabled())))?;
    assert!(apu::is_tracking_forks());
    assert_eq!(apu::backend_name(), "dummy");
    assert_eq!(registry.call("_apu_is_available", &[])?, Value::Bool(true));
    Ok(())
}
