//! The cost-based optimizer: fills the plan table over the query graph and
//! materializes the chosen decomposition as a physical operator tree.

pub mod cardinality;
pub mod cost;
pub mod enumerator;
pub mod plan_table;

use std::rc::Rc;

use tracing::debug;

use crate::ast::cnf::Cnf;
use crate::ast::{BinOp, Expr};
use crate::catalog::{Catalog, Ident, Schema};
use crate::error::PlanError;
use crate::ir::{AdjacencyMatrix, QueryGraph, SourceKind};
use crate::ops::{GroupingAlgo, JoinAlgo, OperatorInformation, OperatorNode};
use crate::util::SmallBitset;

use cardinality::CardinalityEstimator;
use cost::CostFunction;
use enumerator::PlanEnumerator;
use plan_table::{PlanTable, Subproblem};

/// Returns `true` iff the join predicate is a single non-negated equality
/// between two designators; those joins run as simple hash joins.
fn is_equi_join(cnf: &Cnf) -> bool {
    if cnf.size() != 1 {
        return false;
    }
    let clause = &cnf.0[0];
    if clause.size() != 1 {
        return false;
    }
    let literal = &clause.0[0];
    if literal.negated {
        return false;
    }
    match literal.expr.as_ref() {
        Expr::Binary {
            op: BinOp::Eq,
            lhs,
            rhs,
            ..
        } => lhs.as_designator().is_some() && rhs.as_designator().is_some(),
        _ => false,
    }
}

pub struct Optimizer<'a> {
    enumerator: &'a dyn PlanEnumerator,
    estimator: &'a dyn CardinalityEstimator,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        enumerator: &'a dyn PlanEnumerator,
        estimator: &'a dyn CardinalityEstimator,
    ) -> Self {
        Optimizer {
            enumerator,
            estimator,
        }
    }

    /// Optimizes `graph` into a physical plan and the filled plan table.
    pub fn optimize(
        &self,
        catalog: &Catalog,
        graph: &QueryGraph,
    ) -> Result<(OperatorNode, PlanTable), PlanError> {
        let num_sources = graph.num_sources();
        let mut table = PlanTable::new(num_sources);

        if num_sources == 0 {
            // A source-free query evaluates its projections exactly once,
            // guarded by the clauses that reference nothing.
            let mut plan = OperatorNode::projection(catalog, graph.projections.clone());
            if !graph.guard.is_empty() {
                let mut filter = OperatorNode::filter(graph.guard.clone());
                filter.add_child(plan);
                plan = filter;
            }
            return Ok((plan, table));
        }

        /*----- Compute plans and models for the data sources. -------------*/
        let mut source_plans: Vec<Option<OperatorNode>> = Vec::with_capacity(num_sources);
        for ds in graph.sources() {
            let s = Subproblem::singleton(ds.id());
            let mut plan = match &ds.kind {
                SourceKind::BaseTable { table: table_name } => {
                    let db = catalog.get_database_in_use()?;
                    let base = db.get_table(table_name)?;
                    let entry = &mut table[s];
                    entry.cost = 0;
                    let model = self.estimator.estimate_scan(catalog, graph, s);
                    entry.size = self.estimator.predict_cardinality(&model);
                    entry.model = Some(model);
                    OperatorNode::scan(base, ds.name())
                }
                SourceKind::SubQuery {
                    graph: sub,
                    correlated,
                } => {
                    if *correlated {
                        return Err(PlanError::UnsupportedStatement(
                            "correlated nested query in FROM".into(),
                        ));
                    }
                    // Recursively solve the nested query, then prefix its
                    // output schema with the source alias.
                    let (mut sub_plan, sub_table) = self.optimize(catalog, sub)?;
                    let final_entry = sub_table.final_entry();
                    let mut renamed = Schema::new();
                    for e in sub_plan.schema().iter() {
                        renamed
                            .add(Ident::qualified(ds.name(), e.id.name.clone()), e.ty.clone())
                            .map_err(PlanError::Catalog)?;
                    }
                    *sub_plan.schema_mut() = renamed;
                    let entry = &mut table[s];
                    entry.cost = final_entry.cost;
                    entry.size = final_entry.size;
                    entry.model = final_entry.model.clone();
                    sub_plan
                }
            };
            if !ds.filter.is_empty() {
                let mut filter = OperatorNode::filter(ds.filter.clone());
                filter.add_child(plan);
                plan = filter;
                let entry = &mut table[s];
                let model = self.estimator.estimate_filter(
                    graph,
                    entry.model.as_ref().expect("source has a model"),
                    &ds.filter,
                );
                entry.size = self.estimator.predict_cardinality(&model);
                entry.model = Some(model);
            }
            let size = table[s].size;
            plan.info = Some(OperatorInformation {
                subproblem: s,
                estimated_cardinality: size,
            });
            source_plans.push(Some(plan));
        }

        /*----- Fill the plan table. ---------------------------------------*/
        let matrix = AdjacencyMatrix::build(graph)?;
        let cf = CostFunction;
        if num_sources >= 2 {
            self.enumerator
                .enumerate(graph, &matrix, &cf, self.estimator, &mut table);
            if !table.final_entry().has_plan() {
                self.connect_components(graph, &matrix, &cf, &mut table);
            }
        }
        debug!(
            enumerator = self.enumerator.name(),
            cost = table.final_entry().cost,
            size = table.final_entry().size,
            "join order search finished"
        );

        /*----- Construct the operator tree. -------------------------------*/
        let mut joins: Vec<(SmallBitset, Cnf)> = graph
            .joins()
            .iter()
            .map(|j| (j.subproblem(), j.condition.clone()))
            .collect();
        let mut plan = construct_plan(
            &table,
            &mut source_plans,
            &mut joins,
            table.final_subproblem(),
        );

        /*----- Grouping. --------------------------------------------------*/
        if graph.grouping() {
            let entry = table.final_entry_mut();
            let model = self.estimator.estimate_grouping(
                graph,
                entry.model.as_ref().expect("final entry has a model"),
                &graph.group_by,
            );
            entry.size = self.estimator.predict_cardinality(&model);
            entry.model = Some(model);
            let mut grouping = if graph.group_by.is_empty() {
                OperatorNode::aggregation(catalog, graph.aggregates.clone())
            } else {
                // An ordered grouping needs a guaranteed ordering on a
                // prefix of its keys underneath; otherwise hash.
                let algo = grouping_algo(&plan, &graph.group_by);
                OperatorNode::grouping(
                    catalog,
                    graph.group_by.clone(),
                    graph.aggregates.clone(),
                    algo,
                )
            };
            grouping.add_child(plan);
            plan = grouping;

            // HAVING filters the grouped rows; aggregates in the predicate
            // resolve against the grouping's output slots.
            if !graph.having.is_empty() {
                let mut having = OperatorNode::filter(graph.having.clone());
                having.add_child(plan);
                plan = having;
            }
        }

        /*----- Ordering. --------------------------------------------------*/
        if !graph.order_by.is_empty() {
            let schema = plan.schema().clone();
            let mut sorting = OperatorNode::sorting(graph.order_by.clone(), schema);
            sorting.add_child(plan);
            plan = sorting;
        }

        /*----- Projection; kept above the ordering so that ordering keys
         * need not be projected. ------------------------------------------*/
        if !graph.projections.is_empty() {
            let mut projection = OperatorNode::projection(catalog, graph.projections.clone());
            projection.add_child(plan);
            plan = projection;
        }

        /*----- Limit. -----------------------------------------------------*/
        if graph.limit.is_set() {
            let entry = table.final_entry_mut();
            if let Some(model) = entry.model.as_ref() {
                let model = self.estimator.estimate_limit(
                    graph,
                    model,
                    graph.limit.limit,
                    graph.limit.offset,
                );
                entry.size = self.estimator.predict_cardinality(&model);
                entry.model = Some(model);
            }
            let mut limit = OperatorNode::limit(graph.limit.limit, graph.limit.offset);
            limit.add_child(plan);
            plan = limit;
        }

        plan.minimize_schema(catalog);
        Ok((plan, table))
    }

    /// Joins the connected components of an edge-less (or partially
    /// connected) graph left-deep as cross products, so that every query has
    /// a plan.
    fn connect_components(
        &self,
        graph: &QueryGraph,
        matrix: &AdjacencyMatrix,
        cf: &CostFunction,
        table: &mut PlanTable,
    ) {
        let all = SmallBitset::all(graph.num_sources());
        let mut seen = SmallBitset::empty();
        let mut components = Vec::new();
        for v in all {
            if seen.contains(v) {
                continue;
            }
            let comp = matrix.reachable_within(SmallBitset::singleton(v), all);
            seen |= comp;
            components.push(comp);
        }
        let mut acc = components[0];
        for &comp in &components[1..] {
            cf.update(graph, self.estimator, table, acc, comp);
            acc |= comp;
        }
    }
}

/// Picks the grouping algorithm: ordered when the plan under the grouping is
/// a sort whose key list starts with the group keys, hashing otherwise.
fn grouping_algo(plan: &OperatorNode, group_by: &[Rc<Expr>]) -> GroupingAlgo {
    if let crate::ops::OperatorKind::Sorting { order_by } = &plan.kind {
        let prefix_matches = group_by.len() <= order_by.len()
            && group_by
                .iter()
                .zip(order_by.iter())
                .all(|(g, (o, _))| g.as_ref() == o.as_ref());
        if prefix_matches {
            return GroupingAlgo::Ordered;
        }
    }
    GroupingAlgo::Hashing
}

/// Walks the plan table recursively: singletons yield their source plan,
/// inner subproblems drain every join covered by the subproblem into the
/// join predicate and construct the join operator.
fn construct_plan(
    table: &PlanTable,
    source_plans: &mut [Option<OperatorNode>],
    joins: &mut Vec<(SmallBitset, Cnf)>,
    s: Subproblem,
) -> OperatorNode {
    let entry = &table[s];
    let subproblems = entry.subproblems();
    if subproblems.is_empty() {
        assert_eq!(s.len(), 1, "entry without sub-plans must be a singleton");
        let id = s.least_element().expect("non-empty subproblem");
        return source_plans[id].take().expect("source plan consumed twice");
    }

    // Sub-plans must be built before the predicate is drained, so that
    // nested joins claim their conditions first.
    let left = construct_plan(table, source_plans, joins, subproblems[0]);
    let right = construct_plan(table, source_plans, joins, subproblems[1]);

    let mut condition = Cnf::empty();
    joins.retain(|(participants, cnf)| {
        if participants.is_subset(s) {
            condition = std::mem::take(&mut condition).and(cnf.clone());
            false
        } else {
            true
        }
    });

    let algo = if is_equi_join(&condition) {
        JoinAlgo::SimpleHashJoin
    } else {
        JoinAlgo::NestedLoops
    };
    let mut join = OperatorNode::join(condition, algo);
    join.add_child(left);
    join.add_child(right);
    join.info = Some(OperatorInformation {
        subproblem: s,
        estimated_cardinality: entry.size,
    });
    join
}
