//! Lowers a semantically analyzed `SelectStmt` into a [`QueryGraph`].
//!
//! The builder routes `WHERE` clauses to source filters or joins by the set
//! of sources they reference, expands `SELECT *`, and decorrelates nested
//! queries where the correlation is an equi-predicate.

use std::rc::Rc;

use tracing::debug;

use crate::ast::cnf::{self, Clause, Cnf};
use crate::ast::{
    self, BinOp, Designator, Expr, SelectItem, SelectStmt, TableRef, Target,
};
use crate::catalog::{Catalog, Ident, Schema, Symbol};
use crate::error::PlanError;
use crate::ir::{DependentSubquery, QueryGraph, SourceId, SourceKind};

/// Builds [`QueryGraph`]s against a catalog.
pub struct GraphBuilder<'c> {
    catalog: &'c Catalog,
}

impl<'c> GraphBuilder<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        GraphBuilder { catalog }
    }

    pub fn build(&self, stmt: &SelectStmt) -> Result<QueryGraph, PlanError> {
        let mut graph = QueryGraph::new();

        /*----- Sources: one per FROM entry. -------------------------------*/
        for table_ref in &stmt.from {
            match table_ref {
                TableRef::Table { name, alias } => {
                    let db = self.catalog.get_database_in_use()?;
                    db.get_table(name)?; // must exist
                    graph.add_base_table(name.clone(), alias.clone());
                }
                TableRef::Subquery { stmt: sub, alias } => {
                    let sub_graph = self.build(sub)?;
                    let correlated = sub_graph.is_correlated();
                    graph.add_subquery(sub_graph, alias.clone(), correlated);
                }
            }
        }

        /*----- WHERE: convert to CNF, decorrelate nested queries, route. --*/
        if let Some(where_clause) = &stmt.where_clause {
            let where_cnf = cnf::to_cnf(where_clause);
            for clause in where_cnf.0 {
                let mut extra = Vec::new();
                let clause = self.rewrite_clause(clause, &mut graph, &mut extra)?;
                self.route_clause(&mut graph, clause)?;
                for expr in extra {
                    for c in cnf::to_cnf(&expr).0 {
                        self.route_clause(&mut graph, c)?;
                    }
                }
            }
        }

        /*----- Grouping and aggregates. -----------------------------------*/
        graph.group_by = stmt.group_by.clone();
        if let Some(having) = &stmt.having {
            graph.having = cnf::to_cnf(having);
        }
        let mut aggregates = Vec::new();
        for item in &stmt.select {
            if let SelectItem::Expr { expr, .. } = item {
                ast::collect_aggregates(expr, &mut aggregates);
            }
        }
        if let Some(having) = &stmt.having {
            ast::collect_aggregates(having, &mut aggregates);
        }
        for (expr, _) in &stmt.order_by {
            ast::collect_aggregates(expr, &mut aggregates);
        }
        graph.aggregates = aggregates;

        /*----- Projections, ordering, limit. ------------------------------*/
        for item in &stmt.select {
            match item {
                SelectItem::Star { table } => {
                    self.expand_star(&mut graph, table.as_ref())?;
                }
                SelectItem::Expr { expr, alias } => {
                    graph.projections.push((Rc::clone(expr), alias.clone()));
                }
            }
        }
        graph.order_by = stmt.order_by.clone();
        if let Some(l) = stmt.limit {
            graph.limit.limit = l.limit;
            graph.limit.offset = l.offset;
        }

        debug!(
            sources = graph.num_sources(),
            joins = graph.joins().len(),
            "built query graph"
        );
        Ok(graph)
    }

    /// Routes one CNF clause by the set of sources it references.
    fn route_clause(&self, graph: &mut QueryGraph, clause: Clause) -> Result<(), PlanError> {
        let ids = self.referenced_sources(graph, &clause)?;
        let clause_cnf = Cnf(vec![clause]);
        match ids.len() {
            0 => {
                // No source referenced: attach to the first source, or hold
                // as a guard when the graph has none.
                if graph.num_sources() != 0 {
                    graph.source_mut(0).update_filter(clause_cnf);
                } else {
                    graph.guard = std::mem::take(&mut graph.guard).and(clause_cnf);
                }
            }
            1 => graph.source_mut(ids[0]).update_filter(clause_cnf),
            _ => match graph.find_join(&ids) {
                Some(join) => graph.join_mut(join).update_condition(clause_cnf),
                None => {
                    graph.add_join(clause_cnf, ids);
                }
            },
        }
        Ok(())
    }

    /// The ids of the sources of `graph` referenced by `clause`.  Designators
    /// resolved to an outer query do not count.
    fn referenced_sources(
        &self,
        graph: &QueryGraph,
        clause: &Clause,
    ) -> Result<Vec<SourceId>, PlanError> {
        let mut ids = Vec::new();
        for predicate in &clause.0 {
            self.collect_sources(graph, &predicate.expr, &mut ids)?;
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn collect_sources(
        &self,
        graph: &QueryGraph,
        expr: &Rc<Expr>,
        out: &mut Vec<SourceId>,
    ) -> Result<(), PlanError> {
        match expr.as_ref() {
            Expr::Designator(d) => {
                if matches!(d.target, Target::Outer(_)) {
                    return Ok(());
                }
                let id = self.resolve_designator(graph, d)?;
                if !out.contains(&id) {
                    out.push(id);
                }
            }
            Expr::Constant { .. } | Expr::Query { .. } => {}
            Expr::FnApp { args, .. } => {
                for a in args {
                    self.collect_sources(graph, a, out)?;
                }
            }
            Expr::Unary { expr, .. } => self.collect_sources(graph, expr, out)?,
            Expr::Binary { lhs, rhs, .. } => {
                self.collect_sources(graph, lhs, out)?;
                self.collect_sources(graph, rhs, out)?;
            }
        }
        Ok(())
    }

    /// Finds the source a designator refers to, by qualifier or by searching
    /// the source schemas for a bare name.
    fn resolve_designator(
        &self,
        graph: &QueryGraph,
        d: &Designator,
    ) -> Result<SourceId, PlanError> {
        if let Some(table) = &d.table {
            if let Some(ds) = graph.source_by_name(table) {
                return Ok(ds.id());
            }
            return Err(PlanError::UnsupportedStatement(format!(
                "designator references unknown source {table}"
            )));
        }
        for ds in graph.sources() {
            if self.source_schema(graph, ds.id())?.has(&Ident::bare(d.attr.clone())) {
                return Ok(ds.id());
            }
        }
        Err(PlanError::UnsupportedStatement(format!(
            "cannot resolve designator {}",
            d.attr
        )))
    }

    /// The output schema of one source, renamed by the source's name.
    pub fn source_schema(&self, graph: &QueryGraph, id: SourceId) -> Result<Schema, PlanError> {
        let ds = graph.source(id);
        match &ds.kind {
            SourceKind::BaseTable { table } => {
                let db = self.catalog.get_database_in_use()?;
                Ok(db.get_table(table)?.schema_with_prefix(&ds.name()))
            }
            SourceKind::SubQuery { graph: sub, .. } => {
                Ok(subquery_schema(self.catalog, &ds.name(), sub))
            }
        }
    }

    /// Expands `*` (or `table.*`) into the projections of the graph.  In a
    /// correlated query this also emits the primary key of every base table
    /// that provides a correlation target, so that the outer rewrite has a
    /// join column.
    fn expand_star(
        &self,
        graph: &mut QueryGraph,
        only: Option<&Symbol>,
    ) -> Result<(), PlanError> {
        let db = self.catalog.get_database_in_use()?;
        let mut projections = Vec::new();
        for ds in graph.sources() {
            let name = ds.name();
            if let Some(filter) = only {
                if name != *filter {
                    continue;
                }
            }
            match &ds.kind {
                SourceKind::BaseTable { table } => {
                    let table = db.get_table(table)?;
                    for attr in table.attrs() {
                        projections.push((
                            ast::table_col(
                                self.catalog.pool(),
                                name.as_str(),
                                attr.name.as_str(),
                                attr.ty.clone(),
                            ),
                            None,
                        ));
                    }
                }
                SourceKind::SubQuery { graph: sub, .. } => {
                    for (expr, alias) in &sub.projections {
                        let col = projection_name(self.catalog, expr, alias.as_ref());
                        projections.push((
                            ast::table_col(
                                self.catalog.pool(),
                                name.as_str(),
                                col.as_str(),
                                expr.ty().as_vectorial(),
                            ),
                            None,
                        ));
                    }
                }
            }
        }
        if graph.is_correlated() {
            // Emit primary keys of correlation targets not already projected.
            for ds in graph.sources() {
                if let SourceKind::BaseTable { table } = &ds.kind {
                    let table = db.get_table(table)?;
                    for pk in table.primary_key() {
                        let attr = table.attr(pk);
                        let expr = ast::table_col(
                            self.catalog.pool(),
                            ds.name().as_str(),
                            attr.name.as_str(),
                            attr.ty.clone(),
                        );
                        if !projections.iter().any(|(p, _)| p.as_ref() == expr.as_ref()) {
                            projections.push((expr, None));
                        }
                    }
                }
            }
        }
        graph.projections.extend(projections);
        Ok(())
    }

    /// Rewrites one routed clause: every nested query inside it is either
    /// lifted into a source of `graph` (the `Expr::Query` node is replaced
    /// by a designator onto the new source, and the correlation predicates
    /// are re-emitted in `extra` as join predicates) or, when the
    /// correlation is not an equi-predicate, registered as a dependent
    /// subquery and left in place.
    fn rewrite_clause(
        &self,
        clause: Clause,
        graph: &mut QueryGraph,
        extra: &mut Vec<Rc<Expr>>,
    ) -> Result<Clause, PlanError> {
        let mut locals = Vec::new();
        for p in &clause.0 {
            collect_local_designators(&p.expr, &mut locals);
        }
        let mut predicates = Vec::with_capacity(clause.0.len());
        for p in clause.0 {
            let expr = self.rewrite_query_exprs(&p.expr, graph, extra, &locals)?;
            predicates.push(cnf::Predicate {
                negated: p.negated,
                expr,
            });
        }
        Ok(Clause(predicates))
    }

    fn rewrite_query_exprs(
        &self,
        expr: &Rc<Expr>,
        graph: &mut QueryGraph,
        extra: &mut Vec<Rc<Expr>>,
        clause_locals: &[Rc<Expr>],
    ) -> Result<Rc<Expr>, PlanError> {
        match expr.as_ref() {
            Expr::Query { stmt, .. } => {
                self.lift_subquery(expr, stmt, graph, extra, clause_locals)
            }
            Expr::Unary { op, expr: inner, ty } => {
                let inner = self.rewrite_query_exprs(inner, graph, extra, clause_locals)?;
                Ok(Rc::new(Expr::Unary {
                    op: *op,
                    expr: inner,
                    ty: ty.clone(),
                }))
            }
            Expr::Binary { op, lhs, rhs, ty } => {
                let lhs = self.rewrite_query_exprs(lhs, graph, extra, clause_locals)?;
                let rhs = self.rewrite_query_exprs(rhs, graph, extra, clause_locals)?;
                Ok(Rc::new(Expr::Binary {
                    op: *op,
                    lhs,
                    rhs,
                    ty: ty.clone(),
                }))
            }
            _ => Ok(Rc::clone(expr)),
        }
    }

    /// Decorrelates one nested query found in expression position.
    fn lift_subquery(
        &self,
        query_expr: &Rc<Expr>,
        stmt: &Rc<SelectStmt>,
        graph: &mut QueryGraph,
        extra: &mut Vec<Rc<Expr>>,
        clause_locals: &[Rc<Expr>],
    ) -> Result<Rc<Expr>, PlanError> {
        let mut sub = self.build(stmt)?;

        // Gather correlated filter clauses bottom-up: after routing, a
        // clause whose only *local* references are one source ends up in
        // that source's filter, with the outer designators still inside.
        let mut pairs = Vec::new(); // (outer designator, inner designator)
        let mut liftable = true;
        for ds in sub.sources() {
            for clause in &ds.filter.0 {
                if !clause_correlated(clause) {
                    continue;
                }
                match split_equi_correlation(clause) {
                    Some(pair) => pairs.push(pair),
                    None => liftable = false,
                }
            }
        }
        for join in sub.joins() {
            if join.condition.0.iter().any(clause_correlated) {
                liftable = false;
            }
        }

        if !liftable {
            // Non-equi correlation: the nested query stays a dependent
            // subquery, grouped by every outer designator it references --
            // and by the outer columns of the clause around it -- so that it
            // produces a single row per outer tuple.
            let mut outer_keys = Vec::new();
            collect_outer_designators(&sub, &mut outer_keys);
            for local in clause_locals {
                if !outer_keys.iter().any(|o| o.as_ref() == local.as_ref()) {
                    outer_keys.push(Rc::clone(local));
                }
            }
            for key in outer_keys {
                if !sub.group_by.iter().any(|g| g.as_ref() == key.as_ref()) {
                    sub.group_by.push(key);
                }
            }
            debug!("nested query kept as dependent subquery");
            graph.dependent.push(DependentSubquery {
                expr: Rc::clone(query_expr),
                graph: Box::new(sub),
            });
            return Ok(Rc::clone(query_expr));
        }

        // Equi correlation (or none): lift.  Drop the correlated clauses
        // from the nested filters, group by the inner join columns and
        // project them, then join the outer predicate on the new columns.
        for ds_id in 0..sub.num_sources() {
            let filter = std::mem::take(&mut sub.source_mut(ds_id).filter);
            let kept = Cnf(filter
                .0
                .into_iter()
                .filter(|c| !clause_correlated(c))
                .collect());
            sub.source_mut(ds_id).filter = kept;
        }

        let alias = self
            .catalog
            .intern(&format!("$q{}", graph.num_sources()));
        let result_col = {
            let (first, first_alias) = sub
                .projections
                .first()
                .ok_or_else(|| {
                    PlanError::UnsupportedStatement("nested query without projection".into())
                })?;
            projection_name(self.catalog, first, first_alias.as_ref())
        };
        let result_ty = sub
            .projections
            .first()
            .map(|(e, _)| e.ty().as_vectorial())
            .expect("checked above");

        for (outer, inner) in &pairs {
            let inner_d = inner.as_designator().expect("inner side is a designator");
            if !sub.group_by.iter().any(|g| g.as_ref() == inner.as_ref()) {
                sub.group_by.push(Rc::clone(inner));
            }
            if !sub
                .projections
                .iter()
                .any(|(p, _)| p.as_ref() == inner.as_ref())
            {
                sub.projections.push((Rc::clone(inner), None));
            }
            // Join the outer relation on the newly projected column.
            let lifted = ast::table_col(
                self.catalog.pool(),
                alias.as_str(),
                inner_d.attr.as_str(),
                inner_d.ty.as_vectorial(),
            );
            extra.push(ast::eq(lifted, Rc::clone(outer)));
        }

        debug!(alias = %alias, pairs = pairs.len(), "lifted nested query");
        graph.add_subquery(sub, alias.clone(), false);

        // The nested query now contributes a single column the enclosing
        // predicate compares against.
        Ok(ast::table_col(
            self.catalog.pool(),
            alias.as_str(),
            result_col.as_str(),
            result_ty,
        ))
    }
}

/// The display name of a projection: its alias, the bare attribute name for
/// a designator, or the rendered expression.
pub fn projection_name(catalog: &Catalog, expr: &Rc<Expr>, alias: Option<&Symbol>) -> Symbol {
    if let Some(a) = alias {
        return a.clone();
    }
    match expr.as_ref() {
        Expr::Designator(d) => d.attr.clone(),
        other => catalog.intern(&other.to_string()),
    }
}

/// The output schema of a nested query, renamed by its alias.
pub fn subquery_schema(catalog: &Catalog, alias: &Symbol, graph: &QueryGraph) -> Schema {
    let mut schema = Schema::new();
    for (expr, proj_alias) in &graph.projections {
        let name = projection_name(catalog, expr, proj_alias.as_ref());
        schema.push(
            Ident::qualified(alias.clone(), name),
            expr.ty().as_vectorial(),
        );
    }
    schema
}

/// Returns `true` iff any designator of the clause resolves to an outer
/// query.
fn clause_correlated(clause: &Clause) -> bool {
    fn expr_correlated(e: &Expr) -> bool {
        match e {
            Expr::Designator(d) => matches!(d.target, Target::Outer(_)),
            Expr::Constant { .. } | Expr::Query { .. } => false,
            Expr::FnApp { args, .. } => args.iter().any(|a| expr_correlated(a)),
            Expr::Unary { expr, .. } => expr_correlated(expr),
            Expr::Binary { lhs, rhs, .. } => expr_correlated(lhs) || expr_correlated(rhs),
        }
    }
    clause.0.iter().any(|p| expr_correlated(&p.expr))
}

/// If `clause` is a single non-negated `outer == inner` equality between an
/// outer designator and a local one, returns `(outer, inner)`.
fn split_equi_correlation(clause: &Clause) -> Option<(Rc<Expr>, Rc<Expr>)> {
    if clause.0.len() != 1 {
        return None;
    }
    let p = &clause.0[0];
    if p.negated {
        return None;
    }
    let Expr::Binary {
        op: BinOp::Eq,
        lhs,
        rhs,
        ..
    } = p.expr.as_ref()
    else {
        return None;
    };
    let is_outer = |e: &Rc<Expr>| {
        matches!(
            e.as_ref(),
            Expr::Designator(Designator {
                target: Target::Outer(_),
                ..
            })
        )
    };
    let is_local = |e: &Rc<Expr>| {
        matches!(
            e.as_ref(),
            Expr::Designator(Designator {
                target: Target::Attribute,
                ..
            })
        )
    };
    if is_outer(lhs) && is_local(rhs) {
        let Expr::Designator(d) = lhs.as_ref() else {
            unreachable!()
        };
        let Target::Outer(outer) = &d.target else {
            unreachable!()
        };
        Some((Rc::clone(outer), Rc::clone(rhs)))
    } else if is_local(lhs) && is_outer(rhs) {
        let Expr::Designator(d) = rhs.as_ref() else {
            unreachable!()
        };
        let Target::Outer(outer) = &d.target else {
            unreachable!()
        };
        Some((Rc::clone(outer), Rc::clone(lhs)))
    } else {
        None
    }
}

/// Collects the designators of `expr` that resolve within the current query
/// (nested queries are not descended into).
fn collect_local_designators(expr: &Rc<Expr>, out: &mut Vec<Rc<Expr>>) {
    match expr.as_ref() {
        Expr::Designator(d) => {
            if matches!(d.target, Target::Attribute)
                && !out.iter().any(|o| o.as_ref() == expr.as_ref())
            {
                out.push(Rc::clone(expr));
            }
        }
        Expr::Constant { .. } | Expr::Query { .. } => {}
        Expr::FnApp { args, .. } => {
            for a in args {
                collect_local_designators(a, out);
            }
        }
        Expr::Unary { expr, .. } => collect_local_designators(expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_local_designators(lhs, out);
            collect_local_designators(rhs, out);
        }
    }
}

/// Collects the distinct outer designators referenced anywhere in `graph`.
fn collect_outer_designators(graph: &QueryGraph, out: &mut Vec<Rc<Expr>>) {
    fn walk(e: &Rc<Expr>, out: &mut Vec<Rc<Expr>>) {
        match e.as_ref() {
            Expr::Designator(d) => {
                if let Target::Outer(outer) = &d.target {
                    if !out.iter().any(|o| o.as_ref() == outer.as_ref()) {
                        out.push(Rc::clone(outer));
                    }
                }
            }
            Expr::Constant { .. } | Expr::Query { .. } => {}
            Expr::FnApp { args, .. } => {
                for a in args {
                    walk(a, out);
                }
            }
            Expr::Unary { expr, .. } => walk(expr, out),
            Expr::Binary { lhs, rhs, .. } => {
                walk(lhs, out);
                walk(rhs, out);
            }
        }
    }
    for ds in graph.sources() {
        for clause in &ds.filter.0 {
            for p in &clause.0 {
                walk(&p.expr, out);
            }
        }
    }
    for join in graph.joins() {
        for clause in &join.condition.0 {
            for p in &clause.0 {
                walk(&p.expr, out);
            }
        }
    }
    for e in graph
        .group_by
        .iter()
        .chain(graph.aggregates.iter())
        .chain(graph.projections.iter().map(|(e, _)| e))
    {
        walk(e, out);
    }
}
