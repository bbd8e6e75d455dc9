//! The cost function of the join-order search.

use crate::ast::cnf::Cnf;
use crate::ir::QueryGraph;
use crate::planner::cardinality::CardinalityEstimator;
use crate::planner::plan_table::{PlanTable, Subproblem};

/// The fixed linear cost recurrence
/// `cost(L ⋈ R) = cost(L) + cost(R) + size(L) + size(R)`, saturated at
/// `u64::MAX`.  Singletons cost 0.
pub struct CostFunction;

impl CostFunction {
    /// The cost of joining the subproblems `left` and `right` given their
    /// table entries.
    pub fn cost(&self, table: &PlanTable, left: Subproblem, right: Subproblem) -> u64 {
        let l = &table[left];
        let r = &table[right];
        l.cost
            .saturating_add(r.cost)
            .saturating_add(l.size)
            .saturating_add(r.size)
    }

    /// Considers the split `(left, right)` for `left | right` and records it
    /// when it beats the current entry.  Ties keep the lexicographically
    /// smaller `(left, right)` pair, which makes every enumerator
    /// deterministic regardless of its emission order.
    pub fn update(
        &self,
        graph: &QueryGraph,
        estimator: &dyn CardinalityEstimator,
        table: &mut PlanTable,
        left: Subproblem,
        right: Subproblem,
    ) {
        debug_assert!((left & right).is_empty(), "subproblems must be disjoint");
        let (left, right) = if left.raw() <= right.raw() {
            (left, right)
        } else {
            (right, left)
        };
        let cost = self.cost(table, left, right);
        let target = left | right;
        let entry = &table[target];
        let improves = cost < entry.cost
            || (cost == entry.cost
                && (left.raw(), right.raw()) < (entry.left.raw(), entry.right.raw()));
        if !improves {
            return;
        }
        let model = estimator.estimate_join(
            graph,
            table[left].model.as_ref().expect("left has a model"),
            table[right].model.as_ref().expect("right has a model"),
            &Cnf::empty(),
        );
        let size = estimator.predict_cardinality(&model);
        let entry = &mut table[target];
        entry.left = left;
        entry.right = right;
        entry.cost = cost;
        entry.size = size;
        entry.model = Some(model);
    }
}
