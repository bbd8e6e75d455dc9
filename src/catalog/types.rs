//! The SQL type system.

use std::fmt;

/// Whether a type describes a single value or a column of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Scalar,
    Vectorial,
}

/// The kind of a numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumericKind {
    Int,
    Float,
    Decimal,
}

/// A SQL type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// The type of an erroneous expression.
    Error,
    Boolean {
        category: TypeCategory,
    },
    /// A character sequence of fixed `length`, or up to `length` if `varying`.
    Char {
        category: TypeCategory,
        length: usize,
        varying: bool,
    },
    /// `Int` precision is in bytes, `Float` precision in bits (32 or 64),
    /// `Decimal` precision in decimal digits with `scale` digits after the
    /// point.
    Numeric {
        category: TypeCategory,
        kind: NumericKind,
        precision: u32,
        scale: u32,
    },
    Date {
        category: TypeCategory,
    },
    DateTime {
        category: TypeCategory,
    },
    /// A function type: return type and parameter types.
    Fn {
        ret: Box<Type>,
        params: Vec<Type>,
    },
}

impl Type {
    pub fn boolean(category: TypeCategory) -> Type {
        Type::Boolean { category }
    }

    pub fn char(category: TypeCategory, length: usize) -> Type {
        Type::Char {
            category,
            length,
            varying: false,
        }
    }

    pub fn varchar(category: TypeCategory, length: usize) -> Type {
        Type::Char {
            category,
            length,
            varying: true,
        }
    }

    /// An integer of `size` bytes.
    pub fn integer(category: TypeCategory, size: u32) -> Type {
        Type::Numeric {
            category,
            kind: NumericKind::Int,
            precision: size,
            scale: 0,
        }
    }

    pub fn float(category: TypeCategory) -> Type {
        Type::Numeric {
            category,
            kind: NumericKind::Float,
            precision: 32,
            scale: 0,
        }
    }

    pub fn double(category: TypeCategory) -> Type {
        Type::Numeric {
            category,
            kind: NumericKind::Float,
            precision: 64,
            scale: 0,
        }
    }

    pub fn decimal(category: TypeCategory, precision: u32, scale: u32) -> Type {
        Type::Numeric {
            category,
            kind: NumericKind::Decimal,
            precision,
            scale,
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            Type::Error | Type::Fn { .. } => TypeCategory::Scalar,
            Type::Boolean { category }
            | Type::Char { category, .. }
            | Type::Numeric { category, .. }
            | Type::Date { category }
            | Type::DateTime { category } => *category,
        }
    }

    fn with_category(&self, category: TypeCategory) -> Type {
        let mut ty = self.clone();
        match &mut ty {
            Type::Error | Type::Fn { .. } => {}
            Type::Boolean { category: c }
            | Type::Char { category: c, .. }
            | Type::Numeric { category: c, .. }
            | Type::Date { category: c }
            | Type::DateTime { category: c } => *c = category,
        }
        ty
    }

    pub fn as_scalar(&self) -> Type {
        self.with_category(TypeCategory::Scalar)
    }

    pub fn as_vectorial(&self) -> Type {
        self.with_category(TypeCategory::Vectorial)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Boolean { .. })
    }

    pub fn is_character_sequence(&self) -> bool {
        matches!(self, Type::Char { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Numeric { .. })
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                kind: NumericKind::Int,
                ..
            }
        )
    }

    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                kind: NumericKind::Decimal,
                ..
            }
        )
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                kind: NumericKind::Float,
                ..
            }
        )
    }

    /// 32-bit float.
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                kind: NumericKind::Float,
                precision: 32,
                ..
            }
        )
    }

    /// 64-bit float.
    pub fn is_double(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                kind: NumericKind::Float,
                precision: 64,
                ..
            }
        )
    }

    /// The scale of a numeric type, 0 otherwise.
    pub fn scale(&self) -> u32 {
        match self {
            Type::Numeric { scale, .. } => *scale,
            _ => 0,
        }
    }

    pub fn size_in_bits(&self) -> u64 {
        match self {
            Type::Error | Type::Fn { .. } => 0,
            Type::Boolean { .. } => 1,
            Type::Char { length, .. } => 8 * *length as u64,
            Type::Numeric {
                kind: NumericKind::Int,
                precision,
                ..
            } => 8 * u64::from(*precision),
            Type::Numeric {
                kind: NumericKind::Float,
                precision,
                ..
            } => u64::from(*precision),
            Type::Numeric {
                kind: NumericKind::Decimal,
                ..
            } => 64,
            Type::Date { .. } => 32,
            Type::DateTime { .. } => 64,
        }
    }
}

/// Computes the common numeric supertype of two numeric types: the greater
/// kind (`Int < Float < Decimal` collapses to float when either side floats),
/// the greater scale, the greater precision.  Used to bring the operands of a
/// binary numeric operation to one representation.
pub fn arithmetic_join(lhs: &Type, rhs: &Type) -> Type {
    let (Type::Numeric { kind: lk, precision: lp, scale: ls, category },
         Type::Numeric { kind: rk, precision: rp, scale: rs, .. }) = (lhs, rhs)
    else {
        panic!("arithmetic_join requires numeric types");
    };
    use NumericKind::*;
    let kind = match (lk, rk) {
        (Float, _) | (_, Float) => Float,
        (Decimal, _) | (_, Decimal) => Decimal,
        (Int, Int) => Int,
    };
    let precision = match kind {
        Float => {
            // a 64-bit float absorbs anything
            let bits = |k: &NumericKind, p: u32| match k {
                Float => p,
                _ => 64,
            };
            bits(lk, *lp).max(bits(rk, *rp))
        }
        _ => (*lp).max(*rp),
    };
    Type::Numeric {
        category: *category,
        kind,
        precision,
        scale: (*ls).max(*rs),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Error => write!(f, "ERROR"),
            Type::Boolean { .. } => write!(f, "BOOL"),
            Type::Char {
                length, varying, ..
            } => {
                if *varying {
                    write!(f, "VARCHAR({length})")
                } else {
                    write!(f, "CHAR({length})")
                }
            }
            Type::Numeric {
                kind: NumericKind::Int,
                precision,
                ..
            } => write!(f, "INT({precision})"),
            Type::Numeric {
                kind: NumericKind::Float,
                precision,
                ..
            } => {
                if *precision == 32 {
                    write!(f, "FLOAT")
                } else {
                    write!(f, "DOUBLE")
                }
            }
            Type::Numeric {
                kind: NumericKind::Decimal,
                precision,
                scale,
                ..
            } => write!(f, "DECIMAL({precision}, {scale})"),
            Type::Date { .. } => write!(f, "DATE"),
            Type::DateTime { .. } => write!(f, "DATETIME"),
            Type::Fn { ret, params } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}
