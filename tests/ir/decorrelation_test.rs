// tests/ir/decorrelation_test.rs
use std::cell::RefCell;
use std::rc::Rc;

use quillsql::ast::{self, BinOp, Expr, Fnid, SelectItem, SelectStmt, TableRef};
use quillsql::catalog::{Catalog, Type, TypeCategory};
use quillsql::ir::{GraphBuilder, SourceKind};
use quillsql::storage::RowStore;

fn i4() -> Type {
    Type::integer(TypeCategory::Vectorial, 4)
}

fn setup_catalog() -> Catalog {
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();
    for name in ["A", "B"] {
        let table_name = cat.intern(name);
        let id = cat.intern("id");
        let val = cat.intern("val");
        let db = cat.get_database_in_use_mut().unwrap();
        let table = db.add_table(table_name).unwrap();
        table.push_back(id.clone(), i4()).unwrap();
        table.push_back(val, i4()).unwrap();
        table.add_primary_key(&id).unwrap();
        table.set_store(Rc::new(RefCell::new(RowStore::new(vec![i4(), i4()]))));
    }
    cat
}

fn from_table(cat: &Catalog, name: &str) -> TableRef {
    TableRef::Table {
        name: cat.intern(name),
        alias: None,
    }
}

/// `SELECT * FROM A WHERE val = (SELECT MIN(B.val) FROM B WHERE A.id = B.id)`
/// decorrelates into two sources joined on the lifted key column.
#[test]
fn test_equi_correlated_subquery_is_lifted() {
    let cat = setup_catalog();
    let pool = cat.pool();

    let outer_a_id = ast::table_col(pool, "A", "id", i4());
    let inner_where = ast::eq(
        ast::outer_col(pool, "A", "id", Rc::clone(&outer_a_id)),
        ast::table_col(pool, "B", "id", i4()),
    );
    let min_b_val = ast::fn_app(Fnid::Min, vec![ast::table_col(pool, "B", "val", i4())]);
    let inner = Rc::new(SelectStmt {
        from: vec![from_table(&cat, "B")],
        where_clause: Some(inner_where),
        select: vec![SelectItem::Expr {
            expr: min_b_val,
            alias: None,
        }],
        ..SelectStmt::default()
    });

    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(
            ast::table_col(pool, "A", "val", i4()),
            ast::query_expr(inner, Type::integer(TypeCategory::Scalar, 4)),
        )),
        select: vec![SelectItem::Star { table: None }],
        ..SelectStmt::default()
    };

    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();

    // Two sources: A and the lifted subquery.
    assert_eq!(graph.num_sources(), 2);
    assert!(graph.source(0).is_base_table());
    let SourceKind::SubQuery {
        graph: sub,
        correlated,
    } = &graph.source(1).kind
    else {
        panic!("second source must be the lifted subquery");
    };
    assert!(!*correlated, "equi correlation must be fully lifted");
    assert!(!graph.is_correlated());

    // One join carrying both the rewritten comparison and the lifted key
    // equality.
    assert_eq!(graph.joins().len(), 1);
    assert_eq!(graph.join(0).condition.size(), 2);

    // The nested query groups by B.id and projects (MIN(B.val), B.id).
    assert_eq!(sub.group_by.len(), 1);
    assert_eq!(sub.group_by[0].to_string(), "B.id");
    assert_eq!(sub.projections.len(), 2);
    assert_eq!(sub.projections[0].0.to_string(), "min(B.val)");
    assert_eq!(sub.projections[1].0.to_string(), "B.id");

    // The correlated clause is gone from the nested filters.
    for ds in sub.sources() {
        assert!(ds.filter.is_empty());
    }
    assert!(graph.dependent.is_empty());
}

/// `SELECT id FROM A WHERE val = (SELECT MIN(B.val) FROM B WHERE A.id <> B.id)`
/// cannot be lifted; the subquery stays dependent and groups by the outer
/// columns.
#[test]
fn test_non_equi_correlation_stays_dependent() {
    let cat = setup_catalog();
    let pool = cat.pool();

    let outer_a_id = ast::table_col(pool, "A", "id", i4());
    let inner_where = ast::binary(
        BinOp::Ne,
        ast::outer_col(pool, "A", "id", outer_a_id),
        ast::table_col(pool, "B", "id", i4()),
    );
    let min_b_val = ast::fn_app(Fnid::Min, vec![ast::table_col(pool, "B", "val", i4())]);
    let inner = Rc::new(SelectStmt {
        from: vec![from_table(&cat, "B")],
        where_clause: Some(inner_where),
        select: vec![SelectItem::Expr {
            expr: min_b_val,
            alias: None,
        }],
        ..SelectStmt::default()
    });

    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(
            ast::table_col(pool, "A", "val", i4()),
            ast::query_expr(inner, Type::integer(TypeCategory::Scalar, 4)),
        )),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "A", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };

    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();

    // Only A remains a source; the subquery is not joined in.
    assert_eq!(graph.num_sources(), 1);
    assert!(graph.joins().is_empty());

    // The outer filter still holds the query expression.
    assert_eq!(graph.source(0).filter.size(), 1);
    let clause = &graph.source(0).filter.0[0];
    let Expr::Binary { rhs, .. } = clause.0[0].expr.as_ref() else {
        panic!("filter must be the comparison");
    };
    assert!(matches!(rhs.as_ref(), Expr::Query { .. }));

    // The dependent subquery groups by the outer designators (A.id, A.val).
    assert_eq!(graph.dependent.len(), 1);
    let sub = &graph.dependent[0].graph;
    let keys: Vec<String> = sub.group_by.iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["A.id", "A.val"]);
}
