//! Python extension module. Every entry point of the dispatch table is exposed
//! under its `_apu_*` name and forwards to [`FunctionRegistry::global`].

#![allow(missing_docs)]

use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyInt, PyString, PyTuple};

use crate::dispatch::FunctionRegistry;
use crate::error::ApuError;
use crate::generator::Generator;
use crate::value::Value;

impl From<ApuError> for PyErr {
    fn from(err: ApuError) -> Self {
        match err {
            ApuError::ArgumentError(e) => PyTypeError::new_err(e.into_string()),
            ApuError::OutOfRange(e) => PyValueError::new_err(e.into_string()),
            err => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

#[pymethods]
impl Generator {
    #[pyo3(name = "initial_seed")]
    fn initial_seed_py(&self) -> u64 {
        self.initial_seed()
    }

    #[pyo3(name = "current_seed")]
    fn current_seed_py(&self) -> u64 {
        self.current_seed()
    }

    #[pyo3(name = "manual_seed")]
    fn manual_seed_py(&self, seed: u64) {
        self.manual_seed(seed);
    }

    #[pyo3(name = "seed")]
    fn seed_py(&self) -> u64 {
        self.seed()
    }

    fn __repr__(&self) -> String {
        format!("Generator(device='apu', seed={})", self.current_seed())
    }
}

fn value_from_py(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::None);
    }
    // bool is a subclass of int in python, so it goes first
    if let Ok(x) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(x.is_true()));
    }
    if obj.is_instance_of::<PyInt>() {
        return Ok(match obj.extract::<i64>() {
            Ok(x) => Value::Int(x),
            Err(_) => Value::UInt(obj.extract::<u64>()?),
        });
    }
    if let Ok(x) = obj.downcast::<PyFloat>() {
        return Ok(Value::Float(x.value()));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::Str(obj.extract::<String>()?.into()));
    }
    if let Ok(x) = obj.downcast::<Generator>() {
        return Ok(Value::Generator(x.get().clone()));
    }
    Err(PyTypeError::new_err(format!("Unsupported argument type {}", obj.get_type().name()?)))
}

fn value_into_py(py: Python<'_>, value: Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::None => py.None(),
        Value::Bool(x) => PyBool::new(py, x).to_owned().into_any().unbind(),
        Value::Int(x) => x.into_pyobject(py)?.into_any().unbind(),
        Value::UInt(x) => x.into_pyobject(py)?.into_any().unbind(),
        Value::Float(x) => x.into_pyobject(py)?.into_any().unbind(),
        Value::Str(x) => PyString::new(py, &x).into_any().unbind(),
        Value::Generator(x) => Py::new(py, x)?.into_any(),
    })
}

fn call(name: &str, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
    let values = args.iter().map(|arg| value_from_py(&arg)).collect::<PyResult<Vec<Value>>>()?;
    let py = args.py();
    // Blocking device calls must not hold the GIL
    let result = py.allow_threads(|| FunctionRegistry::global().call(name, &values))?;
    value_into_py(py, result)
}

macro_rules! entry_points {
    ($($func:ident => $name:tt),* $(,)?) => {
        $(
            #[pyfunction]
            #[pyo3(name = $name, signature = (*args))]
            fn $func(args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
                call($name, args)
            }
        )*

        fn add_entry_points(m: &Bound<'_, PyModule>) -> PyResult<()> {
            $(m.add_function(wrap_pyfunction!($func, m)?)?;)*
            Ok(())
        }
    };
}

entry_points! {
    device_synchronize => "_apu_deviceSynchronize",
    is_in_bad_fork => "_apu_is_in_bad_fork",
    is_available => "_apu_is_available",
    is_built => "_apu_is_built",
    is_on_macos_13_or_newer => "_apu_is_on_macos_13_or_newer",
    get_default_generator => "_apu_get_default_generator",
    empty_cache => "_apu_emptyCache",
    set_memory_fraction => "_apu_setMemoryFraction",
    current_allocated_memory => "_apu_currentAllocatedMemory",
    driver_allocated_memory => "_apu_driverAllocatedMemory",
    profiler_start_trace => "_apu_profilerStartTrace",
    profiler_stop_trace => "_apu_profilerStopTrace",
    acquire_event => "_apu_acquireEvent",
    release_event => "_apu_releaseEvent",
    record_event => "_apu_recordEvent",
    wait_for_event => "_apu_waitForEvent",
    synchronize_event => "_apu_synchronizeEvent",
    query_event => "_apu_queryEvent",
    elapsed_time_of_events => "_apu_elapsedTimeOfEvents",
}

#[pymodule]
#[pyo3(name = "apu")]
fn apu_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Generator>()?;
    add_entry_points(m)?;
    Ok(())
}
