//! The physical operator tree.
//!
//! An operator either produces tuples, consumes them, or both; the plan is a
//! tree of operators with the sink at the root.  The original deep
//! `Operator`/`Producer`/`Consumer` hierarchy is rendered as one tagged
//! variant plus per-node schema and children.

use std::fmt;
use std::rc::Rc;

use crate::ast::cnf::Cnf;
use crate::ast::{Expr, Fnid};
use crate::catalog::{Catalog, Ident, Schema, Symbol, Table};
use crate::ir::builder::projection_name;
use crate::util::SmallBitset;

/// The join algorithm chosen by the plan constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinAlgo {
    NestedLoops,
    SimpleHashJoin,
}

/// The grouping algorithm chosen by the plan constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupingAlgo {
    Ordered,
    Hashing,
}

/// Subproblem and cardinality information cached on an operator.
#[derive(Clone, Debug)]
pub struct OperatorInformation {
    pub subproblem: SmallBitset,
    pub estimated_cardinality: u64,
}

pub enum OperatorKind {
    /// Produces the rows of a stored table.
    Scan {
        table: Symbol,
        alias: Symbol,
    },
    Filter {
        filter: Cnf,
    },
    Join {
        predicate: Cnf,
        algo: JoinAlgo,
    },
    Projection {
        projections: Vec<(Rc<Expr>, Option<Symbol>)>,
    },
    Grouping {
        group_by: Vec<Rc<Expr>>,
        aggregates: Vec<Rc<Expr>>,
        algo: GroupingAlgo,
    },
    /// Grouping without keys: exactly one output tuple.
    Aggregation {
        aggregates: Vec<Rc<Expr>>,
    },
    Sorting {
        /// `true` means ascending.
        order_by: Vec<(Rc<Expr>, bool)>,
    },
    Limit {
        limit: u64,
        offset: u64,
    },
    /// Sink: hands every tuple to a user callback.
    Callback,
    /// Sink: prints every tuple to the execution context's writer.
    Print,
    /// Sink: drops tuples and counts them.
    NoOp,
}

/// One node of the plan: its kind, the schema of the tuples it produces, and
/// its children.
pub struct OperatorNode {
    pub kind: OperatorKind,
    schema: Schema,
    pub info: Option<OperatorInformation>,
    children: Vec<OperatorNode>,
}

impl OperatorNode {
    fn new(kind: OperatorKind, schema: Schema) -> Self {
        OperatorNode {
            kind,
            schema,
            info: None,
            children: Vec::new(),
        }
    }

    pub fn scan(table: &Table, alias: Symbol) -> Self {
        let schema = table.schema_with_prefix(&alias);
        OperatorNode::new(
            OperatorKind::Scan {
                table: table.name.clone(),
                alias,
            },
            schema,
        )
    }

    pub fn filter(filter: Cnf) -> Self {
        OperatorNode::new(OperatorKind::Filter { filter }, Schema::new())
    }

    pub fn join(predicate: Cnf, algo: JoinAlgo) -> Self {
        OperatorNode::new(OperatorKind::Join { predicate, algo }, Schema::new())
    }

    /// The projection's schema is fixed here and not recomputed on child
    /// rebind.  Entries follow the projection list positionally, so a
    /// duplicated column stays duplicated.
    pub fn projection(catalog: &Catalog, projections: Vec<(Rc<Expr>, Option<Symbol>)>) -> Self {
        let mut schema = Schema::new();
        for (expr, alias) in &projections {
            let name = projection_name(catalog, expr, alias.as_ref());
            let id = match (alias, expr.as_ref()) {
                (None, Expr::Designator(d)) => Ident::new(d.table.clone(), name),
                _ => Ident::bare(name),
            };
            schema.push(id, expr.ty().as_vectorial());
        }
        OperatorNode::new(OperatorKind::Projection { projections }, schema)
    }

    /// Grouping promises its keys followed by its aggregates; the schema is
    /// fixed at construction.
    pub fn grouping(
        catalog: &Catalog,
        group_by: Vec<Rc<Expr>>,
        aggregates: Vec<Rc<Expr>>,
        algo: GroupingAlgo,
    ) -> Self {
        let mut schema = Schema::new();
        for key in &group_by {
            let id = match key.as_ref() {
                Expr::Designator(d) => Ident::new(d.table.clone(), d.attr.clone()),
                other => Ident::bare(catalog.intern(&other.to_string())),
            };
            schema.push(id, key.ty().as_vectorial());
        }
        for agg in &aggregates {
            let id = Ident::bare(catalog.intern(&agg.to_string()));
            schema.push(id, agg.ty().as_vectorial());
        }
        OperatorNode::new(
            OperatorKind::Grouping {
                group_by,
                aggregates,
                algo,
            },
            schema,
        )
    }

    pub fn aggregation(catalog: &Catalog, aggregates: Vec<Rc<Expr>>) -> Self {
        let mut schema = Schema::new();
        for agg in &aggregates {
            let id = Ident::bare(catalog.intern(&agg.to_string()));
            schema.push(id, agg.ty().as_vectorial());
        }
        OperatorNode::new(OperatorKind::Aggregation { aggregates }, schema)
    }

    /// Sorting promises exactly the schema it is constructed with.
    pub fn sorting(order_by: Vec<(Rc<Expr>, bool)>, schema: Schema) -> Self {
        OperatorNode::new(OperatorKind::Sorting { order_by }, schema)
    }

    pub fn limit(limit: u64, offset: u64) -> Self {
        OperatorNode::new(OperatorKind::Limit { limit, offset }, Schema::new())
    }

    pub fn callback() -> Self {
        OperatorNode::new(OperatorKind::Callback, Schema::new())
    }

    pub fn print() -> Self {
        OperatorNode::new(OperatorKind::Print, Schema::new())
    }

    pub fn noop() -> Self {
        OperatorNode::new(OperatorKind::NoOp, Schema::new())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub fn children(&self) -> &[OperatorNode] {
        &self.children
    }

    pub fn child(&self, i: usize) -> &OperatorNode {
        &self.children[i]
    }

    /// Whether this operator owns its schema: it promises a fixed output and
    /// `add_child` must not touch it.
    fn has_fixed_schema(&self) -> bool {
        matches!(
            self.kind,
            OperatorKind::Projection { .. }
                | OperatorKind::Grouping { .. }
                | OperatorKind::Aggregation { .. }
                | OperatorKind::Sorting { .. }
        )
    }

    /// Adds a child.  For operators without a fixed schema the child's
    /// schema is appended to this operator's schema.
    pub fn add_child(&mut self, child: OperatorNode) {
        if !self.has_fixed_schema() {
            self.schema += child.schema();
        }
        self.children.push(child);
    }

    pub fn is_producer(&self) -> bool {
        !matches!(
            self.kind,
            OperatorKind::Callback | OperatorKind::Print | OperatorKind::NoOp
        )
    }

    pub fn is_consumer(&self) -> bool {
        !matches!(self.kind, OperatorKind::Scan { .. })
    }

    /// Reduces every operator's schema to the identifiers actually required
    /// by its ancestors.  Projection, grouping, aggregation and sorting do
    /// not shrink below the schema they promise.  Idempotent.
    pub fn minimize_schema(&mut self, catalog: &Catalog) {
        let required: Vec<Ident> = self.schema.iter().map(|e| e.id.clone()).collect();
        self.minimize(catalog, &required);
    }

    fn minimize(&mut self, catalog: &Catalog, required: &[Ident]) {
        // Own schema: what the parent needs plus what our own expressions
        // read from it.
        if !self.has_fixed_schema() {
            let mut needed = required.to_vec();
            self.own_expression_idents(catalog, &mut needed);
            self.schema.retain(|e| needed.contains(&e.id));
        }

        // What the children must provide.
        let mut child_required: Vec<Ident> = Vec::new();
        match &self.kind {
            OperatorKind::Scan { .. } => {}
            OperatorKind::Projection { projections } => {
                for (expr, _) in projections {
                    idents_reading_through(catalog, expr, &mut child_required);
                }
            }
            OperatorKind::Grouping {
                group_by,
                aggregates,
                ..
            } => {
                for e in group_by.iter().chain(aggregates.iter()) {
                    designator_idents(e, &mut child_required);
                }
            }
            OperatorKind::Aggregation { aggregates } => {
                for e in aggregates {
                    designator_idents(e, &mut child_required);
                }
            }
            OperatorKind::Sorting { order_by } => {
                for e in self.schema.iter() {
                    push_ident(&mut child_required, e.id.clone());
                }
                for (expr, _) in order_by {
                    idents_reading_through(catalog, expr, &mut child_required);
                }
            }
            _ => {
                for e in self.schema.iter() {
                    push_ident(&mut child_required, e.id.clone());
                }
            }
        }

        for child in &mut self.children {
            child.minimize(catalog, &child_required);
        }
    }

    /// The identifiers this operator's own expressions read from its own
    /// schema (filters and join predicates evaluate on the concatenated
    /// child tuples).
    fn own_expression_idents(&self, catalog: &Catalog, out: &mut Vec<Ident>) {
        match &self.kind {
            OperatorKind::Filter { filter } => {
                for clause in &filter.0 {
                    for p in &clause.0 {
                        idents_reading_through(catalog, &p.expr, out);
                    }
                }
            }
            OperatorKind::Join { predicate, .. } => {
                for clause in &predicate.0 {
                    for p in &clause.0 {
                        idents_reading_through(catalog, &p.expr, out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Renders the plan as an indented tree, leaves last.
    pub fn tree_string(&self) -> String {
        fn rec(node: &OperatorNode, depth: usize, out: &mut String) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.describe());
            out.push('\n');
            for c in &node.children {
                rec(c, depth + 1, out);
            }
        }
        let mut out = String::new();
        rec(self, 0, &mut out);
        out
    }

    fn describe(&self) -> String {
        match &self.kind {
            OperatorKind::Scan { table, alias } => {
                format!("Scan ({table} AS {alias}) {}", self.schema)
            }
            OperatorKind::Filter { filter } => format!("Filter {filter} {}", self.schema),
            OperatorKind::Join { predicate, algo } => {
                format!("Join {algo:?} {predicate} {}", self.schema)
            }
            OperatorKind::Projection { .. } => format!("Projection {}", self.schema),
            OperatorKind::Grouping { algo, .. } => {
                format!("Grouping {algo:?} {}", self.schema)
            }
            OperatorKind::Aggregation { .. } => format!("Aggregation {}", self.schema),
            OperatorKind::Sorting { order_by } => {
                let keys: Vec<String> = order_by
                    .iter()
                    .map(|(e, asc)| format!("{e} {}", if *asc { "ASC" } else { "DESC" }))
                    .collect();
                format!("Sorting ({}) {}", keys.join(", "), self.schema)
            }
            OperatorKind::Limit { limit, offset } => {
                format!("Limit ({limit} OFFSET {offset}) {}", self.schema)
            }
            OperatorKind::Callback => format!("Callback {}", self.schema),
            OperatorKind::Print => format!("Print {}", self.schema),
            OperatorKind::NoOp => format!("NoOp {}", self.schema),
        }
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tree_string())
    }
}

fn push_ident(out: &mut Vec<Ident>, id: Ident) {
    if !out.contains(&id) {
        out.push(id);
    }
}

/// Collects the identifiers `expr` reads from the schema it is evaluated
/// against.  Aggregate applications are opaque named slots; their arguments
/// are *not* descended into.
fn idents_reading_through(catalog: &Catalog, expr: &Rc<Expr>, out: &mut Vec<Ident>) {
    match expr.as_ref() {
        Expr::Designator(d) => {
            push_ident(out, Ident::new(d.table.clone(), d.attr.clone()));
        }
        Expr::Constant { .. } | Expr::Query { .. } => {}
        Expr::FnApp { fnid, args, .. } => {
            if fnid.is_aggregate() {
                push_ident(out, Ident::bare(catalog.intern(&expr.to_string())));
            } else if *fnid == Fnid::IsNull || *fnid == Fnid::Int {
                for a in args {
                    idents_reading_through(catalog, a, out);
                }
            }
        }
        Expr::Unary { expr, .. } => idents_reading_through(catalog, expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            idents_reading_through(catalog, lhs, out);
            idents_reading_through(catalog, rhs, out);
        }
    }
}

/// Collects every designator identifier in `expr`, descending into aggregate
/// arguments.
fn designator_idents(expr: &Rc<Expr>, out: &mut Vec<Ident>) {
    match expr.as_ref() {
        Expr::Designator(d) => {
            push_ident(out, Ident::new(d.table.clone(), d.attr.clone()));
        }
        Expr::Constant { .. } | Expr::Query { .. } => {}
        Expr::FnApp { args, .. } => {
            for a in args {
                designator_idents(a, out);
            }
        }
        Expr::Unary { expr, .. } => designator_idents(expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            designator_idents(lhs, out);
            designator_idents(rhs, out);
        }
    }
}
