// tests/ir/query_graph_test.rs
use std::cell::RefCell;
use std::rc::Rc;

use quillsql::ast::{self, BinOp, SelectItem, SelectStmt, TableRef};
use quillsql::catalog::{Catalog, Type, TypeCategory};
use quillsql::ir::{AdjacencyMatrix, GraphBuilder, QueryGraph};
use quillsql::storage::RowStore;

fn i4() -> Type {
    Type::integer(TypeCategory::Vectorial, 4)
}

/// A catalog with tables A(id, val), B(id, val) and C(id, aid), each backed
/// by an empty row store.
fn setup_catalog() -> Catalog {
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();
    for (name, cols) in [
        ("A", vec!["id", "val"]),
        ("B", vec!["id", "val"]),
        ("C", vec!["id", "aid"]),
    ] {
        let table_name = cat.intern(name);
        let cols: Vec<_> = cols.iter().map(|c| cat.intern(c)).collect();
        let db = cat.get_database_in_use_mut().unwrap();
        let table = db.add_table(table_name).unwrap();
        let mut types = Vec::new();
        for col in cols {
            table.push_back(col, i4()).unwrap();
            types.push(i4());
        }
        table.set_store(Rc::new(RefCell::new(RowStore::new(types))));
    }
    cat
}

fn from_table(cat: &Catalog, name: &str) -> TableRef {
    TableRef::Table {
        name: cat.intern(name),
        alias: None,
    }
}

fn star() -> SelectItem {
    SelectItem::Star { table: None }
}

#[test]
fn test_single_source_filter_routing() {
    let cat = setup_catalog();
    let pool = cat.pool();
    // SELECT * FROM A WHERE A.id = 1
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(ast::table_col(pool, "A", "id", i4()), ast::lit_int(1))),
        select: vec![star()],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    assert_eq!(graph.num_sources(), 1);
    assert!(graph.joins().is_empty());
    assert_eq!(graph.source(0).filter.size(), 1);
    assert_eq!(graph.projections.len(), 2); // expanded star: A.id, A.val
}

#[test]
fn test_two_source_clause_becomes_join() {
    let cat = setup_catalog();
    let pool = cat.pool();
    // SELECT * FROM A, B WHERE A.id = B.id AND A.val = B.val
    let join1 = ast::eq(
        ast::table_col(pool, "A", "id", i4()),
        ast::table_col(pool, "B", "id", i4()),
    );
    let join2 = ast::eq(
        ast::table_col(pool, "A", "val", i4()),
        ast::table_col(pool, "B", "val", i4()),
    );
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A"), from_table(&cat, "B")],
        where_clause: Some(ast::and(join1, join2)),
        select: vec![star()],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    assert_eq!(graph.num_sources(), 2);
    // both clauses reference the same source pair: one join, two clauses
    assert_eq!(graph.joins().len(), 1);
    assert_eq!(graph.join(0).condition.size(), 2);
    assert!(graph.join(0).is_binary());
    // both sources reference the join
    assert_eq!(graph.source(0).joins(), &[0]);
    assert_eq!(graph.source(1).joins(), &[0]);
}

#[test]
fn test_constant_clause_goes_to_first_source() {
    let cat = setup_catalog();
    // SELECT * FROM A, B WHERE 1 = 1
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A"), from_table(&cat, "B")],
        where_clause: Some(ast::eq(ast::lit_int(1), ast::lit_int(1))),
        select: vec![star()],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    assert_eq!(graph.source(0).filter.size(), 1);
    assert!(graph.source(1).filter.is_empty());
    assert!(graph.joins().is_empty());
}

#[test]
fn test_grouping_query_shape() {
    let cat = setup_catalog();
    let pool = cat.pool();
    // SELECT AVG(A.id) FROM A GROUP BY A.val
    let avg = ast::fn_app(
        quillsql::ast::Fnid::Avg,
        vec![ast::table_col(pool, "A", "id", i4())],
    );
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        group_by: vec![ast::table_col(pool, "A", "val", i4())],
        select: vec![SelectItem::Expr {
            expr: avg,
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    assert_eq!(graph.num_sources(), 1);
    assert!(graph.joins().is_empty());
    assert_eq!(graph.group_by.len(), 1);
    assert_eq!(graph.aggregates.len(), 1);
    assert_eq!(graph.projections.len(), 1);
}

#[test]
fn test_source_ids_stay_dense_after_removal() {
    let cat = setup_catalog();
    let mut graph = QueryGraph::new();
    let a = graph.add_base_table(cat.intern("A"), None);
    let b = graph.add_base_table(cat.intern("B"), None);
    let c = graph.add_base_table(cat.intern("C"), None);
    graph.add_join(Default::default(), vec![a, b]);
    graph.add_join(Default::default(), vec![b, c]);

    graph.remove_source(a);
    assert_eq!(graph.num_sources(), 2);
    for (i, ds) in graph.sources().iter().enumerate() {
        assert_eq!(ds.id(), i);
    }
    // the A-B join lost its A participant, the B-C join was renumbered
    assert_eq!(graph.join(0).sources(), &[0]);
    assert_eq!(graph.join(1).sources(), &[0, 1]);
}

#[test]
fn test_adjacency_matrix_from_graph() {
    let cat = setup_catalog();
    let mut graph = QueryGraph::new();
    let a = graph.add_base_table(cat.intern("A"), None);
    let b = graph.add_base_table(cat.intern("B"), None);
    let c = graph.add_base_table(cat.intern("C"), None);
    graph.add_join(Default::default(), vec![a, b]);
    graph.add_join(Default::default(), vec![b, c]);

    let m = AdjacencyMatrix::build(&graph).unwrap();
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(m.get(i, j), m.get(j, i), "symmetry at ({i}, {j})");
        }
    }
    assert!(m.get(0, 1));
    assert!(!m.get(0, 2));
    assert!(m.is_connected(quillsql::util::SmallBitset::all(3)));
}

#[test]
fn test_adjacency_matrix_rejects_non_binary_joins() {
    let cat = setup_catalog();
    let mut graph = QueryGraph::new();
    let a = graph.add_base_table(cat.intern("A"), None);
    let b = graph.add_base_table(cat.intern("B"), None);
    let c = graph.add_base_table(cat.intern("C"), None);
    graph.add_join(Default::default(), vec![a, b, c]);
    assert!(AdjacencyMatrix::build(&graph).is_err());
}

#[test]
fn test_clause_over_three_sources_is_one_join() {
    let cat = setup_catalog();
    let pool = cat.pool();
    // WHERE A.id + B.id = C.id -- one clause over three sources
    let sum = ast::binary(
        BinOp::Add,
        ast::table_col(pool, "A", "id", i4()),
        ast::table_col(pool, "B", "id", i4()),
    );
    let stmt = SelectStmt {
        from: vec![
            from_table(&cat, "A"),
            from_table(&cat, "B"),
            from_table(&cat, "C"),
        ],
        where_clause: Some(ast::eq(sum, ast::table_col(pool, "C", "id", i4()))),
        select: vec![star()],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    assert_eq!(graph.joins().len(), 1);
    assert_eq!(graph.join(0).sources().len(), 3);
    assert!(!graph.join(0).is_binary());
}
