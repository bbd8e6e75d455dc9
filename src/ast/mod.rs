//! The typed AST the engine consumes.
//!
//! Lexing, parsing and name resolution happen outside the core: the engine
//! receives statements whose expressions already carry their `Type` and whose
//! designators are resolved.  Tests and embedders build statements with the
//! constructor functions at the bottom of this module.

pub mod cnf;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use once_cell::sync::Lazy;

use crate::catalog::pool::{StringPool, Symbol};
use crate::catalog::types::{arithmetic_join, Type, TypeCategory};

/// What a designator was resolved to.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Unresolved (constant-foldable or erroneous input).
    None,
    /// An attribute of a data source in the same query.
    Attribute,
    /// An expression of an *enclosing* query; makes the query correlated.
    /// Carries the designator of the outer scope.
    Outer(Rc<Expr>),
}

/// A column reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Designator {
    /// The table name or source alias, if the reference is qualified.
    pub table: Option<Symbol>,
    pub attr: Symbol,
    pub target: Target,
    pub ty: Type,
}

/// A literal constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// String concatenation (`..`).
    Cat,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Like,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// Resolved function ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fnid {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    IsNull,
    /// Cast to integer.
    Int,
    /// A user-defined function; not supported by the execution backend.
    Udf,
}

/// Name table of the built-in functions; any other name is a UDF.
static FUNCTIONS: Lazy<HashMap<&'static str, Fnid>> = Lazy::new(|| {
    [
        ("count", Fnid::Count),
        ("sum", Fnid::Sum),
        ("min", Fnid::Min),
        ("max", Fnid::Max),
        ("avg", Fnid::Avg),
        ("isnull", Fnid::IsNull),
        ("int", Fnid::Int),
    ]
    .into_iter()
    .collect()
});

impl Fnid {
    pub fn is_aggregate(self) -> bool {
        matches!(self, Fnid::Count | Fnid::Sum | Fnid::Min | Fnid::Max | Fnid::Avg)
    }

    /// Resolves a function name the way the name resolver does: built-ins
    /// by case-insensitive lookup, everything else a UDF.
    pub fn from_name(name: &str) -> Fnid {
        FUNCTIONS
            .get(name.to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(Fnid::Udf)
    }

    pub fn name(self) -> &'static str {
        match self {
            Fnid::Count => "count",
            Fnid::Sum => "sum",
            Fnid::Min => "min",
            Fnid::Max => "max",
            Fnid::Avg => "avg",
            Fnid::IsNull => "isnull",
            Fnid::Int => "int",
            Fnid::Udf => "udf",
        }
    }
}

/// A typed expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Designator(Designator),
    Constant {
        value: Literal,
        ty: Type,
    },
    FnApp {
        fnid: Fnid,
        args: Vec<Rc<Expr>>,
        ty: Type,
    },
    Unary {
        op: UnOp,
        expr: Rc<Expr>,
        ty: Type,
    },
    Binary {
        op: BinOp,
        lhs: Rc<Expr>,
        rhs: Rc<Expr>,
        ty: Type,
    },
    /// A nested query in expression position (scalar subquery).
    Query {
        stmt: Rc<SelectStmt>,
        ty: Type,
    },
}

impl Expr {
    pub fn ty(&self) -> &Type {
        match self {
            Expr::Designator(d) => &d.ty,
            Expr::Constant { ty, .. }
            | Expr::FnApp { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Query { ty, .. } => ty,
        }
    }

    pub fn as_designator(&self) -> Option<&Designator> {
        match self {
            Expr::Designator(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Constant { .. } => true,
            Expr::Unary { expr, .. } => expr.is_constant(),
            Expr::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            _ => false,
        }
    }
}

/// Collects every distinct aggregate function application in `expr`, in
/// evaluation order.
pub fn collect_aggregates(expr: &Rc<Expr>, out: &mut Vec<Rc<Expr>>) {
    match expr.as_ref() {
        Expr::FnApp { fnid, .. } if fnid.is_aggregate() => {
            if !out.iter().any(|a| a.as_ref() == expr.as_ref()) {
                out.push(Rc::clone(expr));
            }
        }
        Expr::FnApp { args, .. } => {
            for a in args {
                collect_aggregates(a, out);
            }
        }
        Expr::Unary { expr, .. } => collect_aggregates(expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_aggregates(lhs, out);
            collect_aggregates(rhs, out);
        }
        _ => {}
    }
}

pub fn contains_aggregate(expr: &Rc<Expr>) -> bool {
    let mut v = Vec::new();
    collect_aggregates(expr, &mut v);
    !v.is_empty()
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Designator(d) => {
                if let Some(t) = &d.table {
                    write!(f, "{t}.")?;
                }
                write!(f, "{}", d.attr)
            }
            Expr::Constant { value, .. } => write!(f, "{value}"),
            Expr::FnApp { fnid, args, .. } => {
                write!(f, "{}(", fnid.name())?;
                if args.is_empty() && *fnid == Fnid::Count {
                    write!(f, "*")?;
                }
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Unary { op, expr, .. } => {
                let op = match op {
                    UnOp::Plus => "+",
                    UnOp::Minus => "-",
                    UnOp::BitNot => "~",
                    UnOp::Not => "NOT ",
                };
                write!(f, "{op}{expr}")
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::Cat => "..",
                    BinOp::Lt => "<",
                    BinOp::Gt => ">",
                    BinOp::Le => "<=",
                    BinOp::Ge => ">=",
                    BinOp::Eq => "=",
                    BinOp::Ne => "<>",
                    BinOp::Like => "LIKE",
                    BinOp::And => "AND",
                    BinOp::Or => "OR",
                };
                write!(f, "({lhs} {op} {rhs})")
            }
            Expr::Query { .. } => write!(f, "(SELECT ...)"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Literal::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/*----- Statements ---------------------------------------------------------*/

/// An entry of the `FROM` clause.
#[derive(Clone, Debug, PartialEq)]
pub enum TableRef {
    Table {
        name: Symbol,
        alias: Option<Symbol>,
    },
    Subquery {
        stmt: Rc<SelectStmt>,
        alias: Symbol,
    },
}

/// An entry of the `SELECT` clause.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    /// `*` or `table.*`
    Star { table: Option<Symbol> },
    Expr {
        expr: Rc<Expr>,
        alias: Option<Symbol>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LimitClause {
    pub limit: u64,
    pub offset: u64,
}

/// A semantically analyzed `SELECT` statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectStmt {
    pub from: Vec<TableRef>,
    pub where_clause: Option<Rc<Expr>>,
    pub group_by: Vec<Rc<Expr>>,
    pub having: Option<Rc<Expr>>,
    pub select: Vec<SelectItem>,
    /// `true` means ascending.
    pub order_by: Vec<(Rc<Expr>, bool)>,
    pub limit: Option<LimitClause>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: Symbol,
    pub ty: Type,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTableStmt {
    pub table: Symbol,
    pub columns: Vec<ColumnDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStmt {
    pub table: Symbol,
    pub rows: Vec<Vec<Literal>>,
}

/*----- Constructor functions ----------------------------------------------*/

/// A bare column reference, resolved to an attribute of the single source in
/// scope.
pub fn col(pool: &StringPool, attr: &str, ty: Type) -> Rc<Expr> {
    Rc::new(Expr::Designator(Designator {
        table: None,
        attr: pool.intern(attr),
        target: Target::Attribute,
        ty,
    }))
}

/// A qualified column reference `table.attr`.
pub fn table_col(pool: &StringPool, table: &str, attr: &str, ty: Type) -> Rc<Expr> {
    Rc::new(Expr::Designator(Designator {
        table: Some(pool.intern(table)),
        attr: pool.intern(attr),
        target: Target::Attribute,
        ty,
    }))
}

/// A column reference that resolves to `outer`, a designator of an enclosing
/// query.
pub fn outer_col(pool: &StringPool, table: &str, attr: &str, outer: Rc<Expr>) -> Rc<Expr> {
    let ty = outer.ty().clone();
    Rc::new(Expr::Designator(Designator {
        table: Some(pool.intern(table)),
        attr: pool.intern(attr),
        target: Target::Outer(outer),
        ty,
    }))
}

pub fn lit_int(value: i64) -> Rc<Expr> {
    Rc::new(Expr::Constant {
        value: Literal::Int(value),
        ty: Type::integer(TypeCategory::Scalar, 8),
    })
}

pub fn lit_float(value: f64) -> Rc<Expr> {
    Rc::new(Expr::Constant {
        value: Literal::Float(value),
        ty: Type::double(TypeCategory::Scalar),
    })
}

pub fn lit_bool(value: bool) -> Rc<Expr> {
    Rc::new(Expr::Constant {
        value: Literal::Bool(value),
        ty: Type::boolean(TypeCategory::Scalar),
    })
}

pub fn lit_str(value: &str) -> Rc<Expr> {
    Rc::new(Expr::Constant {
        value: Literal::Str(value.to_string()),
        ty: Type::char(TypeCategory::Scalar, value.len()),
    })
}

pub fn lit_null() -> Rc<Expr> {
    Rc::new(Expr::Constant {
        value: Literal::Null,
        ty: Type::Error,
    })
}

pub fn unary(op: UnOp, expr: Rc<Expr>) -> Rc<Expr> {
    let ty = match op {
        UnOp::Not => Type::boolean(expr.ty().category()),
        _ => expr.ty().clone(),
    };
    Rc::new(Expr::Unary { op, expr, ty })
}

pub fn binary(op: BinOp, lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    let category = lhs.ty().category();
    let ty = if op.is_comparison() || op.is_logical() || op == BinOp::Like {
        Type::boolean(category)
    } else if op == BinOp::Cat {
        let len = |t: &Type| match t {
            Type::Char { length, .. } => *length,
            _ => 0,
        };
        Type::char(category, len(lhs.ty()) + len(rhs.ty()))
    } else if lhs.ty().is_numeric() && rhs.ty().is_numeric() {
        arithmetic_join(lhs.ty(), rhs.ty())
    } else {
        lhs.ty().clone()
    };
    Rc::new(Expr::Binary { op, lhs, rhs, ty })
}

/// Shorthand for `binary(BinOp::Eq, ..)`.
pub fn eq(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    binary(BinOp::Eq, lhs, rhs)
}

pub fn and(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    binary(BinOp::And, lhs, rhs)
}

pub fn or(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    binary(BinOp::Or, lhs, rhs)
}

pub fn not(expr: Rc<Expr>) -> Rc<Expr> {
    unary(UnOp::Not, expr)
}

/// A function application.  The result type is derived from the function and
/// its arguments the way the semantic analyzer would.
pub fn fn_app(fnid: Fnid, args: Vec<Rc<Expr>>) -> Rc<Expr> {
    let ty = match fnid {
        Fnid::Count => Type::integer(TypeCategory::Scalar, 8),
        Fnid::Avg => Type::double(TypeCategory::Scalar),
        Fnid::Sum => match args.first().map(|a| a.ty().clone()) {
            Some(t) if t.is_floating_point() => Type::double(TypeCategory::Scalar),
            Some(Type::Numeric {
                kind,
                precision: _,
                scale,
                ..
            }) => Type::Numeric {
                category: TypeCategory::Scalar,
                kind,
                precision: 8,
                scale,
            },
            _ => Type::integer(TypeCategory::Scalar, 8),
        },
        Fnid::Min | Fnid::Max => args
            .first()
            .map(|a| a.ty().as_scalar())
            .unwrap_or(Type::Error),
        Fnid::IsNull => Type::boolean(TypeCategory::Scalar),
        Fnid::Int => Type::integer(TypeCategory::Scalar, 8),
        Fnid::Udf => Type::Error,
    };
    Rc::new(Expr::FnApp { fnid, args, ty })
}

pub fn count_star() -> Rc<Expr> {
    fn_app(Fnid::Count, Vec::new())
}

/// A function application by name, for embedders that hold the function
/// name rather than a resolved id.  Unknown names become UDF applications,
/// which the execution backend rejects.
pub fn fn_call(name: &str, args: Vec<Rc<Expr>>) -> Rc<Expr> {
    fn_app(Fnid::from_name(name), args)
}

/// A scalar subquery in expression position.
pub fn query_expr(stmt: Rc<SelectStmt>, ty: Type) -> Rc<Expr> {
    Rc::new(Expr::Query { stmt, ty })
}
