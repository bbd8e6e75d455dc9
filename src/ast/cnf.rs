//! Conjunctive normal form: the canonical predicate representation for
//! filters and join conditions.

use std::fmt;
use std::rc::Rc;

use crate::ast::{BinOp, Expr, Target, UnOp};
use crate::catalog::pool::Symbol;

/// A possibly negated atomic predicate.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub negated: bool,
    pub expr: Rc<Expr>,
}

impl Predicate {
    pub fn positive(expr: Rc<Expr>) -> Self {
        Predicate {
            negated: false,
            expr,
        }
    }

    pub fn negative(expr: Rc<Expr>) -> Self {
        Predicate {
            negated: true,
            expr,
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.negated == other.negated && self.expr.as_ref() == other.expr.as_ref()
    }
}

/// A disjunction of predicates.
#[derive(Clone, Debug, Default)]
pub struct Clause(pub Vec<Predicate>);

impl Clause {
    pub fn size(&self) -> usize {
        self.0.len()
    }
}

impl PartialEq for Clause {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// A conjunction of clauses.
#[derive(Clone, Debug, Default)]
pub struct Cnf(pub Vec<Clause>);

impl Cnf {
    pub fn empty() -> Self {
        Cnf(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Logical AND: clause list concatenation.
    pub fn and(mut self, other: Cnf) -> Cnf {
        self.0.extend(other.0);
        self
    }
}

/// Equality on CNFs ignores clause order.
impl PartialEq for Cnf {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|c| other.0.contains(c))
            && other.0.iter().all(|c| self.0.contains(c))
    }
}

impl fmt::Display for Cnf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, " AND ")?;
            }
            write!(f, "(")?;
            for (j, p) in clause.0.iter().enumerate() {
                if j != 0 {
                    write!(f, " OR ")?;
                }
                if p.negated {
                    write!(f, "NOT ")?;
                }
                write!(f, "{}", p.expr)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Converts a boolean expression to CNF by recursive De Morgan and
/// distribution.
pub fn to_cnf(expr: &Rc<Expr>) -> Cnf {
    match expr.as_ref() {
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
            ..
        } => to_cnf(lhs).and(to_cnf(rhs)),
        Expr::Binary {
            op: BinOp::Or,
            lhs,
            rhs,
            ..
        } => distribute(to_cnf(lhs), to_cnf(rhs)),
        Expr::Unary {
            op: UnOp::Not,
            expr: inner,
            ..
        } => negate(inner),
        _ => Cnf(vec![Clause(vec![Predicate::positive(Rc::clone(expr))])]),
    }
}

/// CNF of `NOT expr`.
fn negate(expr: &Rc<Expr>) -> Cnf {
    match expr.as_ref() {
        // De Morgan: NOT (a AND b) == NOT a OR NOT b
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
            ..
        } => distribute(negate(lhs), negate(rhs)),
        // De Morgan: NOT (a OR b) == NOT a AND NOT b
        Expr::Binary {
            op: BinOp::Or,
            lhs,
            rhs,
            ..
        } => negate(lhs).and(negate(rhs)),
        // double negation
        Expr::Unary {
            op: UnOp::Not,
            expr: inner,
            ..
        } => to_cnf(inner),
        _ => Cnf(vec![Clause(vec![Predicate::negative(Rc::clone(expr))])]),
    }
}

/// CNF of `lhs OR rhs`: the cross product of the clause lists.
fn distribute(lhs: Cnf, rhs: Cnf) -> Cnf {
    if lhs.is_empty() {
        return rhs;
    }
    if rhs.is_empty() {
        return lhs;
    }
    let mut clauses = Vec::with_capacity(lhs.0.len() * rhs.0.len());
    for l in &lhs.0 {
        for r in &rhs.0 {
            let mut c = l.0.clone();
            c.extend(r.0.iter().cloned());
            clauses.push(Clause(c));
        }
    }
    Cnf(clauses)
}

/// Collects the table names (source aliases) referenced by designators in
/// `expr`.  Designators resolved to an *outer* query do not count.
pub fn tables_referenced(expr: &Expr, out: &mut Vec<Symbol>) {
    match expr {
        Expr::Designator(d) => {
            if matches!(d.target, Target::Outer(_)) {
                return;
            }
            if let Some(t) = &d.table {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        }
        Expr::Constant { .. } | Expr::Query { .. } => {}
        Expr::FnApp { args, .. } => {
            for a in args {
                tables_referenced(a, out);
            }
        }
        Expr::Unary { expr, .. } => tables_referenced(expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            tables_referenced(lhs, out);
            tables_referenced(rhs, out);
        }
    }
}

/// Collects the table names of a whole clause.
pub fn clause_tables(clause: &Clause) -> Vec<Symbol> {
    let mut out = Vec::new();
    for p in &clause.0 {
        tables_referenced(&p.expr, &mut out);
    }
    out
}
