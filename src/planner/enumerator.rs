//! Plan enumerators: dynamic programming over the subset lattice of the
//! join graph.
//!
//! All enumerators share one contract: given a plan table whose singleton
//! entries are filled, record for every *connected* subproblem `S` the
//! cheapest decomposition `(L, R)` with `L ∪ R = S`, `L ∩ R = ∅`, both
//! sides connected and at least one join edge between them.

use tracing::trace;

use crate::error::PlanError;
use crate::ir::{AdjacencyMatrix, QueryGraph};
use crate::planner::cardinality::CardinalityEstimator;
use crate::planner::cost::CostFunction;
use crate::planner::plan_table::{PlanTable, Subproblem};
use crate::util::{GospersHack, SmallBitset, SubsetEnumerator};

pub trait PlanEnumerator {
    fn name(&self) -> &'static str;

    /// Enumerate subplans and fill the plan table.
    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    );
}

/// Resolves an enumerator by name.
pub fn enumerator_from_name(name: &str) -> Result<Box<dyn PlanEnumerator>, PlanError> {
    match name {
        "DPsize" => Ok(Box::new(DpSize)),
        "DPsizeOpt" => Ok(Box::new(DpSizeOpt)),
        "DPsub" => Ok(Box::new(DpSub)),
        "DPsubOpt" => Ok(Box::new(DpSubOpt)),
        "DPccp" => Ok(Box::new(DpCcp)),
        other => Err(PlanError::UnknownEnumerator(other.to_string())),
    }
}

fn viable_pair(
    matrix: &AdjacencyMatrix,
    table: &PlanTable,
    left: Subproblem,
    right: Subproblem,
) -> bool {
    table[left].has_plan()
        && table[right].has_plan()
        && (left & right).is_empty()
        && matrix.is_connected(left)
        && matrix.is_connected(right)
        && matrix.is_connected_pair(left, right)
}

/// Size-driven dynamic programming: subproblems by size 2, 3, .., n; for
/// each size every split into two smaller connected entries is considered.
pub struct DpSize;

impl PlanEnumerator for DpSize {
    fn name(&self) -> &'static str {
        "DPsize"
    }

    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    ) {
        let n = graph.num_sources();
        for size in 2..=n {
            for s1 in 1..=size / 2 {
                let s2 = size - s1;
                for left in GospersHack::enumerate_all(s1, n) {
                    for right in GospersHack::enumerate_all(s2, n) {
                        if !viable_pair(matrix, table, left, right) {
                            continue;
                        }
                        trace!(s = (left | right).raw(), "considering split");
                        cf.update(graph, estimator, table, left, right);
                    }
                }
            }
        }
    }
}

/// `DPsize` without symmetric duplicate work: when both sides have equal
/// size, only pairs with `L < R` are enumerated.
pub struct DpSizeOpt;

impl PlanEnumerator for DpSizeOpt {
    fn name(&self) -> &'static str {
        "DPsizeOpt"
    }

    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    ) {
        let n = graph.num_sources();
        for size in 2..=n {
            for s1 in 1..=size / 2 {
                let s2 = size - s1;
                let equal_sizes = s1 == s2;
                for left in GospersHack::enumerate_all(s1, n) {
                    let rights = if equal_sizes {
                        // Resume enumeration right after `left`.
                        let mut gh = GospersHack::enumerate_from(left, n);
                        gh.next(); // skip `left` itself
                        gh
                    } else {
                        GospersHack::enumerate_all(s2, n)
                    };
                    for right in rights {
                        if !viable_pair(matrix, table, left, right) {
                            continue;
                        }
                        cf.update(graph, estimator, table, left, right);
                    }
                }
            }
        }
    }
}

/// Subset-driven dynamic programming: all `2^n` subproblems in ascending
/// numerical order; for each, every proper non-empty subset via the
/// `next_subset` recurrence.
pub struct DpSub;

impl PlanEnumerator for DpSub {
    fn name(&self) -> &'static str {
        "DPsub"
    }

    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    ) {
        let n = graph.num_sources();
        for raw in 1..(1u64 << n) {
            let s = Subproblem::from_raw(raw);
            if s.len() < 2 || !matrix.is_connected(s) {
                continue;
            }
            let mut left = SmallBitset::empty().next_subset(s);
            while left != s {
                let right = s - left;
                if viable_pair(matrix, table, left, right) {
                    cf.update(graph, estimator, table, left, right);
                }
                left = left.next_subset(s);
            }
        }
    }
}

/// `DPsub` enumerating only the half of the splits with `L < R`; the cost
/// update considers both orientations.
pub struct DpSubOpt;

impl PlanEnumerator for DpSubOpt {
    fn name(&self) -> &'static str {
        "DPsubOpt"
    }

    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    ) {
        let n = graph.num_sources();
        for raw in 1..(1u64 << n) {
            let s = Subproblem::from_raw(raw);
            if s.len() < 2 || !matrix.is_connected(s) {
                continue;
            }
            let mut left = SmallBitset::empty().next_subset(s);
            while left != s {
                let right = s - left;
                if left.raw() < right.raw() && viable_pair(matrix, table, left, right) {
                    cf.update(graph, estimator, table, left, right);
                }
                left = left.next_subset(s);
            }
        }
    }
}

/// Connected-subgraph / complement-pair enumeration (Moerkotte & Neumann):
/// only pairs that are both connected and share an edge are generated, which
/// prunes the search dramatically on sparse join graphs.
pub struct DpCcp;

impl DpCcp {
    /// Emits all connected supersets of `s` grown through `neighbors(s) - x`,
    /// then recurses.
    fn enumerate_csg_rec(
        &self,
        ctx: &mut CcpContext<'_, '_>,
        s: Subproblem,
        x: SmallBitset,
    ) {
        let neighborhood = ctx.matrix.neighbors(s) - x;
        if neighborhood.is_empty() {
            return;
        }
        for size in 1..=neighborhood.len() {
            for subset in SubsetEnumerator::new(neighborhood, size) {
                self.emit_csg(ctx, s | subset);
            }
        }
        for size in 1..=neighborhood.len() {
            for subset in SubsetEnumerator::new(neighborhood, size) {
                self.enumerate_csg_rec(ctx, s | subset, x | neighborhood);
            }
        }
    }

    /// For a connected subgraph `s1`, enumerates its connected complements
    /// and updates the table for every pair.
    fn emit_csg(&self, ctx: &mut CcpContext<'_, '_>, s1: Subproblem) {
        let min = s1.least_element().expect("non-empty subgraph");
        let x = s1 | SmallBitset::all(min + 1);
        let neighborhood = ctx.matrix.neighbors(s1) - x;
        for v in neighborhood.iter().collect::<Vec<_>>().into_iter().rev() {
            let s2 = Subproblem::singleton(v);
            self.emit_pair(ctx, s1, s2);
            self.enumerate_cmp_rec(
                ctx,
                s1,
                s2,
                x | (SmallBitset::all(v + 1) & neighborhood),
            );
        }
    }

    /// Grows the complement `s2` of `s1` through its neighborhood.
    fn enumerate_cmp_rec(
        &self,
        ctx: &mut CcpContext<'_, '_>,
        s1: Subproblem,
        s2: Subproblem,
        x: SmallBitset,
    ) {
        let neighborhood = ctx.matrix.neighbors(s2) - x;
        if neighborhood.is_empty() {
            return;
        }
        for size in 1..=neighborhood.len() {
            for subset in SubsetEnumerator::new(neighborhood, size) {
                self.emit_pair(ctx, s1, s2 | subset);
            }
        }
        for size in 1..=neighborhood.len() {
            for subset in SubsetEnumerator::new(neighborhood, size) {
                self.enumerate_cmp_rec(ctx, s1, s2 | subset, x | neighborhood);
            }
        }
    }

    fn emit_pair(&self, ctx: &mut CcpContext<'_, '_>, s1: Subproblem, s2: Subproblem) {
        if !ctx.matrix.is_connected_pair(s1, s2) {
            return;
        }
        ctx.cf.update(ctx.graph, ctx.estimator, ctx.table, s1, s2);
    }
}

struct CcpContext<'a, 'b> {
    graph: &'a QueryGraph,
    matrix: &'a AdjacencyMatrix,
    cf: &'a CostFunction,
    estimator: &'a dyn CardinalityEstimator,
    table: &'b mut PlanTable,
}

impl PlanEnumerator for DpCcp {
    fn name(&self) -> &'static str {
        "DPccp"
    }

    fn enumerate(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
    ) {
        let n = graph.num_sources();
        let mut ctx = CcpContext {
            graph,
            matrix,
            cf,
            estimator,
            table,
        };
        for v in (0..n).rev() {
            let s = Subproblem::singleton(v);
            self.emit_csg(&mut ctx, s);
            self.enumerate_csg_rec(&mut ctx, s, SmallBitset::all(v + 1));
        }
    }
}
