//! Runtime values and tuples.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::catalog::schema::Schema;
use crate::catalog::types::{NumericKind, Type};
use crate::util::SmallBitset;

/// One attribute value.  Cannot represent NULL; NULLness lives in the
/// tuple's mask (and the VM's parallel null stack).
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
}

impl Value {
    /// A defined placeholder of the right kind for a NULL slot.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Boolean { .. } => Value::Bool(false),
            Type::Char { .. } => Value::Str(Rc::from("")),
            Type::Numeric { kind, precision, .. } => match kind {
                NumericKind::Int | NumericKind::Decimal => Value::Int(0),
                NumericKind::Float if *precision == 32 => Value::Float(0.0),
                NumericKind::Float => Value::Double(0.0),
            },
            _ => Value::Int(0),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("value is not a bool: {other:?}"),
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => panic!("value is not an int: {other:?}"),
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            Value::Float(f) => *f,
            other => panic!("value is not a float: {other:?}"),
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(d) => *d,
            other => panic!("value is not a double: {other:?}"),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(s) => s,
            other => panic!("value is not a string: {other:?}"),
        }
    }
}

/// Bit equality: floats compare by representation so that equality stays
/// consistent with [`Hash`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Value::Double(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Value::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A fixed-size array of values plus a NULL mask.  A set bit in the mask
/// means NULL.
#[derive(Clone, Debug)]
pub struct Tuple {
    values: Vec<Value>,
    null_mask: SmallBitset,
}

impl Tuple {
    /// A fresh tuple for `schema`; every value starts NULL.
    pub fn new(schema: &Schema) -> Self {
        Tuple {
            values: schema
                .iter()
                .map(|e| Value::default_for(&e.ty))
                .collect(),
            null_mask: SmallBitset::all(schema.num_entries()),
        }
    }

    pub fn with_len(n: usize) -> Self {
        Tuple {
            values: vec![Value::Int(0); n],
            null_mask: SmallBitset::all(n),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_null(&self, idx: usize) -> bool {
        assert!(idx < self.values.len(), "index out of bounds");
        self.null_mask.contains(idx)
    }

    pub fn set_null(&mut self, idx: usize) {
        assert!(idx < self.values.len(), "index out of bounds");
        self.null_mask.set(idx);
    }

    /// Sets every value to NULL.
    pub fn clear(&mut self) {
        self.null_mask = SmallBitset::all(self.values.len());
    }

    /// Assigns `value` at `idx` and clears the NULL bit.
    pub fn set(&mut self, idx: usize, value: Value) {
        assert!(idx < self.values.len(), "index out of bounds");
        self.null_mask.clear(idx);
        self.values[idx] = value;
    }

    /// Assigns `value` at `idx` with an explicit NULL bit.
    pub fn set_with_null(&mut self, idx: usize, value: Value, is_null: bool) {
        assert!(idx < self.values.len(), "index out of bounds");
        self.null_mask.set_to(idx, is_null);
        self.values[idx] = value;
    }

    /// The value at `idx`, ignoring the NULL bit.
    pub fn value(&self, idx: usize) -> &Value {
        assert!(idx < self.values.len(), "index out of bounds");
        &self.values[idx]
    }

    /// The value at `idx`; must not be NULL.
    pub fn get(&self, idx: usize) -> &Value {
        assert!(!self.is_null(idx), "value must not be NULL");
        &self.values[idx]
    }

    /// Copies `len` leading values of `other` into `self` starting at `pos`.
    pub fn insert(&mut self, other: &Tuple, pos: usize, len: usize) {
        for i in 0..len {
            self.set_with_null(pos + i, other.values[i].clone(), other.is_null(i));
        }
    }

    /// A clone; alias of `Clone` kept for symmetry with the tuple buffer
    /// call sites.
    pub fn clone_tuple(&self) -> Tuple {
        self.clone()
    }
}

/// Equality under the NULL mask: NULL slots compare equal regardless of the
/// placeholder value they hold.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        if self.values.len() != other.values.len() || self.null_mask != other.null_mask {
            return false;
        }
        (0..self.values.len())
            .filter(|&i| !self.is_null(i))
            .all(|i| self.values[i] == other.values[i])
    }
}

impl Eq for Tuple {}

impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.null_mask.raw().hash(state);
        for i in 0..self.values.len() {
            if !self.is_null(i) {
                self.values[i].hash(state);
            }
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for i in 0..self.values.len() {
            if i != 0 {
                write!(f, ", ")?;
            }
            if self.is_null(i) {
                write!(f, "NULL")?;
            } else {
                write!(f, "{}", self.values[i])?;
            }
        }
        write!(f, ")")
    }
}
