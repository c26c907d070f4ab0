use apu::{ApuError, Config, DummyConfig, DummyDevice, FunctionRegistry, Value};

fn bind_dummy() {
    // Tests in this file share one process, first one binds
    let _ = apu::bind_hooks(Box::new(DummyDevice::new(&DummyConfig::enabled())));
}

#[test]
fn available_with_dummy() {
    bind_dummy();
    assert!(apu::is_available());
    assert_eq!(apu::backend_name(), "dummy");
    assert!(!apu::is_in_bad_fork());
    let available = FunctionRegistry::global().call("_apu_is_available", &[]).unwrap();
    assert_eq!(available.as_bool(), Some(true));
}

#[test]
fn manual_seed_is_visible_through_generator() -> Result<(), ApuError> {
    bind_dummy();
    apu::manual_seed(42);
    let generator = FunctionRegistry::global().call("_apu_get_default_generator", &[])?;
    let generator = generator.as_generator().unwrap();
    assert_eq!(generator.current_seed(), 42);
    apu::manual_seed(u64::MAX);
    assert_eq!(generator.current_seed(), u64::MAX);
    Ok(())
}

#[test]
fn synchronize_and_commit() -> Result<(), ApuError> {
    bind_dummy();
    apu::commit()?;
    apu::synchronize()?;
    Ok(())
}

#[test]
fn is_built_follows_features() {
    bind_dummy();
    assert_eq!(apu::is_built(), cfg!(feature = "hip"));
    assert_eq!(
        FunctionRegistry::global().call("_apu_is_built", &[]).unwrap(),
        Value::Bool(cfg!(feature = "hip"))
    );
}

#[test]
fn backend_is_bound_only_once() {
    bind_dummy();
    assert!(matches!(
        apu::bind_hooks(Box::new(apu::NoAccelerator)),
        Err(ApuError::AlreadyInitialized)
    ));
    assert!(matches!(apu::initialize(&Config::default()), Err(ApuError::AlreadyInitialized)));
    assert_eq!(apu::backend_name(), "dummy");
}
