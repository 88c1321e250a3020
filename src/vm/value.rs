use std::fmt;

use super::heap::GcRef;

/// A tagged runtime value.
///
/// Everything except `Obj` is a plain copy. `Obj` is a non-owning handle
/// into the [`Heap`](super::Heap); it stays valid only while the object is
/// reachable from a root.
#[derive(Clone, Copy)]
pub enum Value {
    Bool(bool),
    Nil,
    Number(f64),
    Obj(GcRef),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<GcRef> {
        match self {
            Value::Obj(r) => Some(*r),
            _ => None,
        }
    }

    /// `nil` and `false` are falsey; every other value is truthy.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::Obj(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            // Identity, not content. Interning makes this sound for strings.
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<GcRef> for Value {
    fn from(r: GcRef) -> Self {
        Value::Obj(r)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Nil => write!(f, "Nil"),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Obj(r) => write!(f, "Obj({})", r.index()),
        }
    }
}

/// Formats primitives. Objects print as a placeholder; use
/// [`Heap::format_value`](super::Heap::format_value) to render object contents.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Nil => write!(f, "nil"),
            Value::Number(n) => write_number(f, *n),
            Value::Obj(_) => write!(f, "<object>"),
        }
    }
}

/// Six significant digits with trailing zeros dropped, switching to
/// exponent notation outside `1e-4 <= |n| < 1e6`, the way C's `%g` does.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    const PRECISION: i32 = 6;

    if n.is_nan() {
        return f.write_str("nan");
    }
    if n.is_infinite() {
        return f.write_str(if n < 0.0 { "-inf" } else { "inf" });
    }
    if n == 0.0 {
        return f.write_str(if n.is_sign_negative() { "-0" } else { "0" });
    }

    // Rounding to the precision first decides which notation applies.
    let scientific = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return write!(f, "{}", n);
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return write!(f, "{}", n);
    };

    if (-4..PRECISION).contains(&exponent) {
        let fixed = format!("{:.*}", (PRECISION - 1 - exponent) as usize, n);
        f.write_str(trim_fraction(&fixed))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        write!(f, "{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

/// Capacity step shared by every growable buffer in the core.
pub(crate) fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 { 8 } else { capacity * 2 }
}

/// A growable array of values, used as a chunk's constant pool.
#[derive(Debug, Clone, Default)]
pub struct ValueArray {
    values: Vec<Value>,
}

impl ValueArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, doubling capacity when full.
    pub fn write(&mut self, value: Value) {
        if self.values.len() == self.values.capacity() {
            let new_capacity = grow_capacity(self.values.capacity());
            self.values.reserve_exact(new_capacity - self.values.len());
        }
        self.values.push(value);
    }

    /// Bytes the next [`write`](Self::write) adds to the backing array.
    pub fn write_growth(&self) -> usize {
        if self.values.len() < self.values.capacity() {
            return 0;
        }
        (grow_capacity(self.values.capacity()) - self.values.capacity()) * std::mem::size_of::<Value>()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }
}
