//! Values extracted from a script and their coercions.
//!
//! Every `to_*` method is total: a value of the "wrong" type is converted
//! using a fixed table instead of failing.
//!
//! | from \ to  | int / int64            | float           | bool       | string            |
//! |------------|------------------------|-----------------|------------|-------------------|
//! | Nil        | 0                      | 0.0             | false      | ""                |
//! | Bool       | 1 / 0                  | 1.0 / 0.0       | itself     | "true" / "false"  |
//! | Int        | itself (i32 saturates) | as f64          | != 0       | decimal           |
//! | Float      | truncated, saturating  | itself          | != 0.0     | shortest decimal  |
//! | Str        | numeric prefix, else 0 | numeric prefix  | non-empty  | lossy UTF-8       |
//! | Table etc. | 0                      | 0.0             | true       | type name         |

use mlua::Value;

/// An owned copy of a script variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// `nil`
    Nil,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string; scripts may store arbitrary bytes.
    Str(Vec<u8>),
    /// A table (contents are not copied).
    Table,
    /// A function.
    Function,
    /// Any other kind of value, by type name.
    Other(&'static str),
}

enum Number {
    Int(i64),
    Float(f64),
}

impl ScriptValue {
    /// Copies a Lua value out of the VM.
    pub fn from_lua(value: &Value<'_>) -> Self {
        match value {
            Value::Nil => ScriptValue::Nil,
            Value::Boolean(b) => ScriptValue::Bool(*b),
            Value::Integer(i) => ScriptValue::Int(*i),
            Value::Number(n) => ScriptValue::Float(*n),
            Value::String(s) => ScriptValue::Str(s.as_bytes().to_vec()),
            Value::Table(_) => ScriptValue::Table,
            Value::Function(_) => ScriptValue::Function,
            other => ScriptValue::Other(other.type_name()),
        }
    }

    /// Name of the value's type as scripts see it.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "integer",
            ScriptValue::Float(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::Table => "table",
            ScriptValue::Function => "function",
            ScriptValue::Other(name) => name,
        }
    }

    /// Converts to a 64-bit integer.
    pub fn to_int64(&self) -> i64 {
        match self {
            ScriptValue::Int(i) => *i,
            ScriptValue::Float(f) => truncate(*f),
            ScriptValue::Bool(b) => i64::from(*b),
            ScriptValue::Str(s) => match numeric_prefix(s) {
                Some(Number::Int(i)) => i,
                Some(Number::Float(f)) => truncate(f),
                None => 0,
            },
            _ => 0,
        }
    }

    /// Converts to a 32-bit integer, saturating at the type's bounds.
    pub fn to_int(&self) -> i32 {
        self.to_int64().clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// Converts to a float.
    pub fn to_float(&self) -> f64 {
        match self {
            ScriptValue::Int(i) => *i as f64,
            ScriptValue::Float(f) => *f,
            ScriptValue::Bool(b) => f64::from(u8::from(*b)),
            ScriptValue::Str(s) => match numeric_prefix(s) {
                Some(Number::Int(i)) => i as f64,
                Some(Number::Float(f)) => f,
                None => 0.0,
            },
            _ => 0.0,
        }
    }

    /// Converts to a boolean.
    pub fn to_bool(&self) -> bool {
        match self {
            ScriptValue::Nil => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Int(i) => *i != 0,
            ScriptValue::Float(f) => *f != 0.0,
            ScriptValue::Str(s) => !s.is_empty(),
            ScriptValue::Table | ScriptValue::Function | ScriptValue::Other(_) => true,
        }
    }

    /// Converts to a string.
    pub fn to_string_lossy(&self) -> String {
        match self {
            ScriptValue::Nil => String::new(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Int(i) => i.to_string(),
            ScriptValue::Float(f) => f.to_string(),
            ScriptValue::Str(s) => String::from_utf8_lossy(s).into_owned(),
            other => other.type_name().to_string(),
        }
    }
}

// `as` saturates and maps NaN to 0.
fn truncate(f: f64) -> i64 {
    f.trunc() as i64
}

/// Longest numeric prefix after leading whitespace: sign, digits, an
/// optional fraction and an optional exponent.
fn numeric_prefix(bytes: &[u8]) -> Option<Number> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let s = &bytes[start..];
    let digits = |from: usize| s[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut end = usize::from(matches!(s.first(), Some(b'+') | Some(b'-')));
    let whole = digits(end);
    end += whole;

    let mut fraction = 0;
    if s.get(end) == Some(&b'.') {
        fraction = digits(end + 1);
        if whole > 0 || fraction > 0 {
            end += 1 + fraction;
        }
    }
    if whole == 0 && fraction == 0 {
        return None;
    }

    let mut is_float = fraction > 0 || s.get(end - 1) == Some(&b'.');
    if matches!(s.get(end), Some(b'e') | Some(b'E')) {
        let sign = usize::from(matches!(s.get(end + 1), Some(b'+') | Some(b'-')));
        let exponent = digits(end + 1 + sign);
        if exponent > 0 {
            end += 1 + sign + exponent;
            is_float = true;
        }
    }

    let text = std::str::from_utf8(&s[..end]).ok()?;
    if !is_float {
        if let Ok(i) = text.parse::<i64>() {
            return Some(Number::Int(i));
        }
    }
    text.trim_end_matches('.').parse::<f64>().ok().map(Number::Float)
}
