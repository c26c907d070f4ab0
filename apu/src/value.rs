//! Untyped values exchanged with the scripting runtime

use crate::error::ApuError;
use crate::generator::Generator;

/// Argument or return value of a dispatched entry point
#[derive(Debug, Clone)]
pub enum Value {
    /// No value, returned by operations without meaningful result
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Box<str>),
    Generator(Generator),
}

impl Value {
    /// Name of the value's type, used in argument errors
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Generator(_) => "Generator",
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Unpacks an unsigned 32 bit integer. Bools are not integers here.
    pub fn to_u32(&self) -> Result<u32, ApuError> {
        match *self {
            Value::Int(x) => u32::try_from(x)
                .map_err(|_| ApuError::argument_error(format!("expected an unsigned 32 bit int, got {x}"))),
            Value::UInt(x) => u32::try_from(x)
                .map_err(|_| ApuError::argument_error(format!("expected an unsigned 32 bit int, got {x}"))),
            _ => Err(ApuError::argument_error(format!("expected an int, got {}", self.type_name()))),
        }
    }

    /// Unpacks a float, integers are converted
    pub fn to_f64(&self) -> Result<f64, ApuError> {
        match *self {
            Value::Float(x) => Ok(x),
            Value::Int(x) => Ok(x as f64),
            Value::UInt(x) => Ok(x as f64),
            _ => Err(ApuError::argument_error(format!("expected a float, got {}", self.type_name()))),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ApuError> {
        match *self {
            Value::Bool(x) => Ok(x),
            _ => Err(ApuError::argument_error(format!("expected a bool, got {}", self.type_name()))),
        }
    }

    pub fn to_str(&self) -> Result<&str, ApuError> {
        match self {
            Value::Str(x) => Ok(&**x),
            _ => Err(ApuError::argument_error(format!("expected a str, got {}", self.type_name()))),
        }
    }

    /// Returns the value if it is an unsigned integer
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(x) => Some(x),
            Value::Int(x) if x >= 0 => Some(x as u64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(x) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(x) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_generator(&self) -> Option<&Generator> {
        match self {
            Value::Generator(x) => Some(x),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::UInt(x), Value::UInt(y)) => x == y,
            (Value::Int(x), Value::UInt(y)) | (Value::UInt(y), Value::Int(x)) => {
                u64::try_from(*x).is_ok_and(|x| x == *y)
            }
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Generator(x), Value::Generator(y)) => x.same_as(y),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<Generator> for Value {
    fn from(value: Generator) -> Self {
        Value::Generator(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}
