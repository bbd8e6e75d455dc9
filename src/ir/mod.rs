//! The relation-algebraic intermediate representation: the query graph and
//! its adjacency matrix.

pub mod builder;

use std::fmt;
use std::rc::Rc;

use crate::ast::cnf::Cnf;
use crate::ast::{Expr, Target};
use crate::catalog::pool::Symbol;
use crate::error::PlanError;
use crate::util::SmallBitset;

pub use builder::GraphBuilder;

pub type SourceId = usize;
pub type JoinId = usize;

/// What a data source is: a stored table or a nested query.
pub enum SourceKind {
    BaseTable {
        table: Symbol,
    },
    SubQuery {
        graph: Box<QueryGraph>,
        /// `true` iff the nested query still references the enclosing query
        /// and must be evaluated per outer tuple.
        correlated: bool,
    },
}

/// Something that can be evaluated to a sequence of tuples, optionally
/// filtered.  Sources are joined with one another by [`Join`]s.
pub struct DataSource {
    id: SourceId,
    pub alias: Option<Symbol>,
    pub filter: Cnf,
    /// The joins this source participates in.  Kept in sync by the graph so
    /// that removing a join touches O(degree) places.
    joins: Vec<JoinId>,
    pub kind: SourceKind,
}

impl DataSource {
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// The name this source is addressed by: its alias, or the table name.
    pub fn name(&self) -> Symbol {
        if let Some(a) = &self.alias {
            return a.clone();
        }
        match &self.kind {
            SourceKind::BaseTable { table } => table.clone(),
            SourceKind::SubQuery { .. } => panic!("nested query without alias"),
        }
    }

    /// Conjoins `filter` onto the current filter.
    pub fn update_filter(&mut self, filter: Cnf) {
        self.filter = std::mem::take(&mut self.filter).and(filter);
    }

    pub fn joins(&self) -> &[JoinId] {
        &self.joins
    }

    pub fn is_base_table(&self) -> bool {
        matches!(self.kind, SourceKind::BaseTable { .. })
    }
}

/// Combines data sources by a join condition.
pub struct Join {
    pub condition: Cnf,
    sources: Vec<SourceId>,
}

impl Join {
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn is_binary(&self) -> bool {
        self.sources.len() == 2
    }

    /// Conjoins `condition` onto the current condition.
    pub fn update_condition(&mut self, condition: Cnf) {
        self.condition = std::mem::take(&mut self.condition).and(condition);
    }

    /// The participant set as a bitset over source ids.
    pub fn subproblem(&self) -> SmallBitset {
        let mut s = SmallBitset::empty();
        for &id in &self.sources {
            s.set(id);
        }
        s
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub limit: u64,
    pub offset: u64,
}

impl Limits {
    pub fn is_set(&self) -> bool {
        self.limit != 0 || self.offset != 0
    }
}

/// The normalized representation of one query block: data sources, joins,
/// grouping, ordering, projection and limit.
#[derive(Default)]
pub struct QueryGraph {
    sources: Vec<DataSource>,
    joins: Vec<Join>,
    pub group_by: Vec<Rc<Expr>>,
    pub aggregates: Vec<Rc<Expr>>,
    /// Filter over the grouped result.
    pub having: Cnf,
    pub projections: Vec<(Rc<Expr>, Option<Symbol>)>,
    pub order_by: Vec<(Rc<Expr>, bool)>,
    pub limit: Limits,
    /// Clauses that reference no source at all; evaluated once per query.
    pub guard: Cnf,
    /// Nested queries that could not be decorrelated.  The filter that
    /// contains the corresponding `Expr::Query` evaluates them per tuple.
    pub dependent: Vec<DependentSubquery>,
}

/// A nested query that stays correlated: it is re-evaluated per outer tuple,
/// grouped so that it produces a single row each time.
pub struct DependentSubquery {
    /// The `Expr::Query` node in the enclosing filter.
    pub expr: Rc<Expr>,
    pub graph: Box<QueryGraph>,
}

impl QueryGraph {
    pub fn new() -> Self {
        QueryGraph::default()
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// The source with the given id.  Ids equal vector positions.
    pub fn source(&self, id: SourceId) -> &DataSource {
        let ds = &self.sources[id];
        debug_assert_eq!(ds.id, id, "given id and data source id must match");
        ds
    }

    pub fn source_mut(&mut self, id: SourceId) -> &mut DataSource {
        let ds = &mut self.sources[id];
        debug_assert_eq!(ds.id, id, "given id and data source id must match");
        ds
    }

    /// Looks a source up by its name (alias or table name).
    pub fn source_by_name(&self, name: &Symbol) -> Option<&DataSource> {
        self.sources.iter().find(|s| s.name() == *name)
    }

    /// Adds a base table source and returns its id.
    pub fn add_base_table(&mut self, table: Symbol, alias: Option<Symbol>) -> SourceId {
        let id = self.sources.len();
        self.sources.push(DataSource {
            id,
            alias,
            filter: Cnf::empty(),
            joins: Vec::new(),
            kind: SourceKind::BaseTable { table },
        });
        id
    }

    /// Adds a nested query source and returns its id.
    pub fn add_subquery(&mut self, graph: QueryGraph, alias: Symbol, correlated: bool) -> SourceId {
        let id = self.sources.len();
        self.sources.push(DataSource {
            id,
            alias: Some(alias),
            filter: Cnf::empty(),
            joins: Vec::new(),
            kind: SourceKind::SubQuery {
                graph: Box::new(graph),
                correlated,
            },
        });
        id
    }

    /// Adds a join over `sources` and registers it with each participant.
    pub fn add_join(&mut self, condition: Cnf, sources: Vec<SourceId>) -> JoinId {
        debug_assert!(sources.iter().all(|&s| s < self.sources.len()));
        let id = self.joins.len();
        for &s in &sources {
            self.sources[s].joins.push(id);
        }
        self.joins.push(Join { condition, sources });
        id
    }

    /// Finds the join with exactly this participant set.
    pub fn find_join(&self, sources: &[SourceId]) -> Option<JoinId> {
        self.joins.iter().position(|j| {
            j.sources.len() == sources.len() && sources.iter().all(|s| j.sources.contains(s))
        })
    }

    pub fn join(&self, id: JoinId) -> &Join {
        &self.joins[id]
    }

    pub fn join_mut(&mut self, id: JoinId) -> &mut Join {
        &mut self.joins[id]
    }

    /// Removes a source.  The remaining ids are re-packed to stay dense and
    /// all joins are rewritten accordingly.  Joins that referenced the
    /// removed source drop it from their participant list.
    pub fn remove_source(&mut self, id: SourceId) -> DataSource {
        assert!(id < self.sources.len(), "source id out of bounds");
        let removed = self.sources.remove(id);
        for ds in self.sources.iter_mut().skip(id) {
            ds.id -= 1;
        }
        for join in &mut self.joins {
            join.sources.retain(|&s| s != id);
            for s in &mut join.sources {
                if *s > id {
                    *s -= 1;
                }
            }
        }
        removed
    }

    /// Removes a join, unlinking it from its participants.
    pub fn remove_join(&mut self, id: JoinId) -> Join {
        assert!(id < self.joins.len(), "join id out of bounds");
        let removed = self.joins.remove(id);
        for ds in &mut self.sources {
            ds.joins.retain(|&j| j != id);
            for j in &mut ds.joins {
                if *j > id {
                    *j -= 1;
                }
            }
        }
        removed
    }

    /// Returns `true` iff the graph contains a grouping.
    pub fn grouping(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }

    /// Returns `true` iff any designator in this graph references an
    /// attribute whose defining source is not in this graph.
    pub fn is_correlated(&self) -> bool {
        fn expr_correlated(e: &Expr) -> bool {
            match e {
                Expr::Designator(d) => matches!(d.target, Target::Outer(_)),
                Expr::Constant { .. } => false,
                Expr::FnApp { args, .. } => args.iter().any(|a| expr_correlated(a)),
                Expr::Unary { expr, .. } => expr_correlated(expr),
                Expr::Binary { lhs, rhs, .. } => expr_correlated(lhs) || expr_correlated(rhs),
                Expr::Query { .. } => false,
            }
        }
        fn cnf_correlated(cnf: &Cnf) -> bool {
            cnf.0
                .iter()
                .any(|c| c.0.iter().any(|p| expr_correlated(&p.expr)))
        }
        self.sources.iter().any(|s| {
            cnf_correlated(&s.filter)
                || match &s.kind {
                    SourceKind::SubQuery { correlated, graph } => {
                        *correlated || graph.is_correlated()
                    }
                    SourceKind::BaseTable { .. } => false,
                }
        }) || self.joins.iter().any(|j| cnf_correlated(&j.condition))
            || cnf_correlated(&self.having)
            || self
                .group_by
                .iter()
                .chain(self.aggregates.iter())
                .chain(self.projections.iter().map(|(e, _)| e))
                .chain(self.order_by.iter().map(|(e, _)| e))
                .any(|e| expr_correlated(e))
    }
}

/// An adjacency matrix over the sources of a query graph whose joins are all
/// binary.  Represents the join graph.
#[derive(Clone)]
pub struct AdjacencyMatrix {
    m: [SmallBitset; SmallBitset::CAPACITY],
    num_vertices: usize,
}

impl AdjacencyMatrix {
    pub fn new(num_vertices: usize) -> Self {
        AdjacencyMatrix {
            m: [SmallBitset::empty(); SmallBitset::CAPACITY],
            num_vertices,
        }
    }

    /// Builds the matrix from the joins of `graph`.  Rejects non-binary
    /// joins.
    pub fn build(graph: &QueryGraph) -> Result<Self, PlanError> {
        let mut m = AdjacencyMatrix::new(graph.num_sources());
        for join in graph.joins() {
            if !join.is_binary() {
                return Err(PlanError::NonBinaryJoin);
            }
            m.set_bidirectional(join.sources()[0], join.sources()[1]);
        }
        Ok(m)
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    /// Sets the bit in row `i` at offset `j`.
    pub fn set(&mut self, i: usize, j: usize) {
        assert!(
            i < self.num_vertices && j < self.num_vertices,
            "offset is out of bounds"
        );
        self.m[i].set(j);
    }

    /// Sets `(i, j)` and the symmetric `(j, i)`.
    pub fn set_bidirectional(&mut self, i: usize, j: usize) {
        self.set(i, j);
        self.set(j, i);
    }

    pub fn get(&self, i: usize, j: usize) -> bool {
        assert!(
            i < self.num_vertices && j < self.num_vertices,
            "offset is out of bounds"
        );
        self.m[i].contains(j)
    }

    /// The set of nodes in `within` reachable from any node of `src`,
    /// computed as a fixpoint over neighbor union.
    pub fn reachable_within(&self, src: SmallBitset, within: SmallBitset) -> SmallBitset {
        let mut r_old = SmallBitset::empty();
        let mut r_new = src & within;
        loop {
            let fresh = r_new - r_old;
            if fresh.is_empty() {
                return r_new;
            }
            r_old = r_new;
            for x in fresh {
                r_new |= self.m[x] & within;
            }
        }
    }

    /// The neighbors of `s`; nodes of `s` itself are excluded.
    pub fn neighbors(&self, s: SmallBitset) -> SmallBitset {
        let mut n = SmallBitset::empty();
        for x in s {
            n |= self.m[x];
        }
        n - s
    }

    /// Returns `true` iff `s` is connected: any node of `s` reaches all other
    /// nodes of `s` using only nodes of `s`.
    pub fn is_connected(&self, s: SmallBitset) -> bool {
        match s.least_element() {
            None => false,
            Some(first) => self.reachable_within(SmallBitset::singleton(first), s) == s,
        }
    }

    /// Returns `true` iff at least one edge crosses `left` and `right`.
    pub fn is_connected_pair(&self, left: SmallBitset, right: SmallBitset) -> bool {
        !(self.neighbors(right) & left).is_empty()
    }
}

impl fmt::Display for AdjacencyMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adjacency Matrix")?;
        for row in self.m.iter().take(self.num_vertices) {
            write!(f, "\n{:0width$b}", row.raw(), width = self.num_vertices)?;
        }
        Ok(())
    }
}
