//! Conversion between native values and Lua values
//!
//! `Push` turns a native value into a Lua value, `Check` reads a native value
//! back out of a callback's argument list. Argument positions are 1-based, the
//! way Lua reports them.
//!
//! 64-bit integers cross the boundary as decimal strings: a Lua number cannot
//! hold every `u64`, and a Lua integer cannot hold every `u64` either.

use mlua::{Function, IntoLuaMulti, Lua, Value};
use thiserror::Error;
use tracing::{debug, error};

/// A callback argument had the wrong type or was out of range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad argument #{position} ({expected} expected, got {got})")]
pub struct ArgumentError {
    pub position: usize,
    pub expected: String,
    pub got: String,
}

impl ArgumentError {
    pub fn new(position: usize, expected: impl Into<String>, value: Option<&Value>) -> Self {
        let got = match value {
            Some(Value::Integer(i)) => format!("number {i}"),
            Some(Value::Number(n)) => format!("number {n}"),
            Some(value) => value.type_name().to_string(),
            None => "no value".to_string(),
        };
        Self {
            position,
            expected: expected.into(),
            got,
        }
    }
}

impl From<ArgumentError> for mlua::Error {
    fn from(err: ArgumentError) -> Self {
        mlua::Error::external(err)
    }
}

/// Native value that can be handed to a script
pub trait Push {
    fn push(self, lua: &Lua) -> mlua::Result<Value>;
}

impl Push for () {
    fn push(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::Nil)
    }
}

impl Push for bool {
    fn push(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::Boolean(self))
    }
}

macro_rules! push_integer {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, _lua: &Lua) -> mlua::Result<Value> {
                    Ok(Value::Integer(i64::from(self)))
                }
            }
        )*
    };
}

push_integer!(i8, i16, i32, u8, u16, u32);

impl Push for f32 {
    fn push(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::Number(f64::from(self)))
    }
}

impl Push for f64 {
    fn push(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::Number(self))
    }
}

impl Push for &str {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::String(lua.create_string(self)?))
    }
}

impl Push for String {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        self.as_str().push(lua)
    }
}

impl Push for i64 {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        self.to_string().push(lua)
    }
}

impl Push for u64 {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        self.to_string().push(lua)
    }
}

impl<T: Push> Push for Option<T> {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            Some(value) => value.push(lua),
            None => Ok(Value::Nil),
        }
    }
}

/// Native value that can be read from a callback argument
pub trait Check: Sized {
    /// Read a required argument
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError>;

    /// Read an optional argument, falling back to `default` when it is absent or
    /// unusable. Never fails.
    fn check_or(args: &[Value], narg: usize, default: Self) -> Self;
}

/// Argument at a 1-based position, `None` when the caller passed fewer arguments
pub fn arg(args: &[Value], narg: usize) -> Option<&Value> {
    narg.checked_sub(1).and_then(|index| args.get(index))
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Number(n) => float_to_integer(*n),
        Value::String(s) => {
            let s = s.to_str().ok()?;
            let text = s.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(float_to_integer))
        }
        _ => None,
    }
}

fn float_to_integer(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows i64
    if n.fract() == 0.0 && n >= -9_223_372_036_854_775_808.0 && n < 9_223_372_036_854_775_808.0 {
        Some(n as i64)
    } else {
        None
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        Value::String(s) => s.to_str().ok()?.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Lua's own string coercion: strings as-is, numbers rendered
fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(format!("{n:.1}")),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

macro_rules! check_integer {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl Check for $ty {
                fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
                    let value = arg(args, narg);
                    value
                        .and_then(to_integer)
                        .and_then(|i| <$ty>::try_from(i).ok())
                        .ok_or_else(|| ArgumentError::new(narg, $name, value))
                }

                fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
                    arg(args, narg)
                        .and_then(to_integer)
                        .and_then(|i| <$ty>::try_from(i).ok())
                        .unwrap_or(default)
                }
            }
        )*
    };
}

check_integer!(
    i8 => "int8",
    i16 => "int16",
    i32 => "int32",
    u8 => "uint8",
    u16 => "uint16",
    u32 => "uint32"
);

impl Check for f64 {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        let value = arg(args, narg);
        value
            .and_then(to_number)
            .ok_or_else(|| ArgumentError::new(narg, "number", value))
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        arg(args, narg).and_then(to_number).unwrap_or(default)
    }
}

impl Check for f32 {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        f64::check(args, narg).map(|n| n as f32)
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        arg(args, narg)
            .and_then(to_number)
            .map(|n| n as f32)
            .unwrap_or(default)
    }
}

impl Check for bool {
    /// Booleans never fail: numbers are true when non-zero, everything else
    /// follows Lua truthiness and a missing argument is false.
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        Ok(Self::check_or(args, narg, false))
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        match arg(args, narg) {
            None => default,
            Some(Value::Integer(i)) => *i != 0,
            Some(Value::Number(n)) => *n != 0.0,
            Some(Value::Nil) => false,
            Some(Value::Boolean(b)) => *b,
            Some(_) => true,
        }
    }
}

impl Check for String {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        let value = arg(args, narg);
        value
            .and_then(to_string)
            .ok_or_else(|| ArgumentError::new(narg, "string", value))
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        arg(args, narg).and_then(to_string).unwrap_or(default)
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.to_str().ok()?.trim().parse().ok(),
        Value::Integer(_) | Value::Number(_) => to_integer(value),
        _ => None,
    }
}

fn to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.to_str().ok()?.trim().parse().ok(),
        Value::Integer(i) => u64::try_from(*i).ok(),
        // 2^64 is exactly representable; anything at or above it overflows u64
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < 18_446_744_073_709_551_616.0 => {
            Some(*n as u64)
        }
        _ => None,
    }
}

impl Check for i64 {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        let value = arg(args, narg);
        value
            .and_then(to_i64)
            .ok_or_else(|| ArgumentError::new(narg, "int64 (as string)", value))
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        arg(args, narg).and_then(to_i64).unwrap_or(default)
    }
}

impl Check for u64 {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        let value = arg(args, narg);
        value
            .and_then(to_u64)
            .ok_or_else(|| ArgumentError::new(narg, "uint64 (as string)", value))
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        arg(args, narg).and_then(to_u64).unwrap_or(default)
    }
}

/// Read a function argument, typically a callback being registered
pub fn check_function(args: &[Value], narg: usize) -> Result<Function, ArgumentError> {
    match arg(args, narg) {
        Some(Value::Function(function)) => Ok(function.clone()),
        value => Err(ArgumentError::new(narg, "function", value)),
    }
}

/// Call a script function, logging instead of propagating any error it raises
///
/// Returns whether the call completed. A failing script never interrupts the
/// host's control flow.
pub fn call_function(function: &Function, args: impl IntoLuaMulti) -> bool {
    match function.call::<()>(args) {
        Ok(()) => true,
        Err(err) => {
            report(&err);
            false
        }
    }
}

/// Log every message carried by a script error
pub fn report(err: &mlua::Error) {
    for message in error_messages(err) {
        error!(target: "scripting", "{}", message);
    }
}

/// Drain the messages of an error chain, outermost first
///
/// A callback error wraps the error that caused it, which may itself wrap
/// further causes, so this keeps popping until the chain is exhausted.
pub fn error_messages(err: &mlua::Error) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);

    while let Some(err) = current {
        match err.downcast_ref::<mlua::Error>() {
            Some(mlua::Error::CallbackError { traceback, cause }) => {
                debug!(target: "scripting", "{}", traceback);
                let cause: &mlua::Error = cause;
                current = Some(cause);
            }
            _ => {
                messages.push(err.to_string());
                current = err.source();
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Push + Check + Clone>(lua: &Lua, value: T) -> T {
        let pushed = value.push(lua).unwrap();
        T::check(&[pushed], 1).unwrap()
    }

    #[test]
    fn test_primitive_round_trips() {
        let lua = Lua::new();

        assert!(round_trip(&lua, true));
        assert!(!round_trip(&lua, false));
        assert_eq!(round_trip(&lua, i8::MIN), i8::MIN);
        assert_eq!(round_trip(&lua, u8::MAX), u8::MAX);
        assert_eq!(round_trip(&lua, i16::MIN), i16::MIN);
        assert_eq!(round_trip(&lua, u16::MAX), u16::MAX);
        assert_eq!(round_trip(&lua, i32::MIN), i32::MIN);
        assert_eq!(round_trip(&lua, u32::MAX), u32::MAX);
        assert_eq!(round_trip(&lua, 1.5f32), 1.5f32);
        assert_eq!(round_trip(&lua, -0.125f64), -0.125f64);
        assert_eq!(round_trip(&lua, "hello".to_string()), "hello");
    }

    #[test]
    fn test_64_bit_integers_travel_as_strings() {
        let lua = Lua::new();

        for value in [u64::MIN, 1, u64::MAX, u64::MAX - 1, 1 << 53 | 1] {
            let pushed = value.push(&lua).unwrap();
            assert!(matches!(pushed, Value::String(_)));
            assert_eq!(u64::check(&[pushed], 1).unwrap(), value);
        }

        for value in [i64::MIN, -1, 0, i64::MAX] {
            assert_eq!(round_trip(&lua, value), value);
        }
    }

    #[test]
    fn test_64_bit_check_rejects_non_integers() {
        let lua = Lua::new();
        let args = [
            "not a number".push(&lua).unwrap(),
            Value::Boolean(true),
            "18446744073709551616".push(&lua).unwrap(),
        ];

        let err = u64::check(&args, 1).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.expected, "uint64 (as string)");
        assert!(i64::check(&args, 2).is_err());
        // One past u64::MAX
        assert!(u64::check(&args, 3).is_err());
        assert!(u64::check(&args, 4).is_err());

        assert_eq!(u64::check_or(&args, 1, 7), 7);
        assert_eq!(i64::check_or(&args, 4, -7), -7);
    }

    #[test]
    fn test_64_bit_check_accepts_plain_numbers() {
        let args = [
            Value::Number(5.0),
            Value::Integer(-12),
            Value::Number(-3.0),
            Value::Number(2.5),
        ];

        assert_eq!(i64::check(&args, 1).unwrap(), 5);
        assert_eq!(u64::check(&args, 1).unwrap(), 5);
        assert_eq!(i64::check(&args, 2).unwrap(), -12);
        assert!(u64::check(&args, 2).is_err());
        assert_eq!(i64::check(&args, 3).unwrap(), -3);
        assert!(u64::check(&args, 3).is_err());
        assert!(i64::check(&args, 4).is_err());
        assert_eq!(u64::check_or(&args, 4, 9), 9);
    }

    #[test]
    fn test_range_checked_integers() {
        let args = [Value::Integer(300), Value::Integer(-1), Value::Number(2.5)];

        assert!(u8::check(&args, 1).is_err());
        assert_eq!(u16::check(&args, 1).unwrap(), 300);
        assert!(u32::check(&args, 2).is_err());
        assert_eq!(i32::check(&args, 2).unwrap(), -1);
        assert!(i32::check(&args, 3).is_err());

        assert_eq!(u8::check_or(&args, 1, 9), 9);
        assert_eq!(u32::check_or(&args, 2, 9), 9);
    }

    #[test]
    fn test_numeric_strings_coerce() {
        let lua = Lua::new();
        let args = ["42".push(&lua).unwrap(), " 1.25 ".push(&lua).unwrap()];

        assert_eq!(u32::check(&args, 1).unwrap(), 42);
        assert_eq!(f64::check(&args, 2).unwrap(), 1.25);
        assert_eq!(String::check(&[Value::Integer(5)], 1).unwrap(), "5");
    }

    #[test]
    fn test_optional_arguments_fall_back_to_default() {
        let lua = Lua::new();
        let args = [Value::Nil, "text".push(&lua).unwrap()];

        assert_eq!(u32::check_or(&args, 1, 11), 11);
        assert_eq!(u32::check_or(&args, 2, 11), 11);
        assert_eq!(u32::check_or(&args, 3, 11), 11);
        assert_eq!(f32::check_or(&args, 2, 0.5), 0.5);
        assert_eq!(String::check_or(&args, 1, "fallback".into()), "fallback");
        assert_eq!(String::check_or(&args, 2, "fallback".into()), "text");
    }

    #[test]
    fn test_bool_uses_number_and_truthiness() {
        let lua = Lua::new();
        let args = [
            Value::Integer(0),
            Value::Number(3.0),
            Value::Nil,
            "x".push(&lua).unwrap(),
        ];

        assert!(!bool::check(&args, 1).unwrap());
        assert!(bool::check(&args, 2).unwrap());
        assert!(!bool::check(&args, 3).unwrap());
        assert!(bool::check(&args, 4).unwrap());
        assert!(!bool::check(&args, 5).unwrap());
        assert!(bool::check_or(&args, 5, true));
    }

    #[test]
    fn test_missing_argument_error_names_position() {
        let err = u32::check(&[], 2).unwrap_err();
        assert_eq!(err.to_string(), "bad argument #2 (uint32 expected, got no value)");
    }

    #[test]
    fn test_check_function() {
        let lua = Lua::new();
        let function = lua.create_function(|_, ()| Ok(())).unwrap();
        let args = [Value::Function(function), Value::Integer(1)];

        assert!(check_function(&args, 1).is_ok());
        assert_eq!(check_function(&args, 2).unwrap_err().expected, "function");
    }

    #[test]
    fn test_call_function_swallows_script_errors() {
        let lua = Lua::new();
        let failing: Function = lua
            .load("return function() error('boom') end")
            .eval()
            .unwrap();
        let working: Function = lua
            .load("return function(a, b) result = a + b end")
            .eval()
            .unwrap();

        assert!(!call_function(&failing, ()));
        assert!(call_function(&working, (2, 3)));
        assert_eq!(lua.globals().get::<i64>("result").unwrap(), 5);
    }

    #[test]
    fn test_error_messages_follow_the_cause_chain() {
        let lua = Lua::new();
        let inner = lua
            .create_function(|_, ()| -> mlua::Result<()> {
                Err(mlua::Error::RuntimeError("inner failure".into()))
            })
            .unwrap();
        lua.globals().set("inner", inner).unwrap();
        let outer: Function = lua.load("return function() inner() end").eval().unwrap();

        let err = outer.call::<()>(()).unwrap_err();
        let messages = error_messages(&err);

        assert!(!messages.is_empty());
        assert!(messages.iter().any(|m| m.contains("inner failure")));
    }
}
