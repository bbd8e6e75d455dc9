// tests/planner/cardinality_test.rs
use std::cell::RefCell;
use std::rc::Rc;

use quillsql::ast::cnf::Cnf;
use quillsql::catalog::{Catalog, Type, TypeCategory};
use quillsql::ir::QueryGraph;
use quillsql::planner::cardinality::{
    CardinalityEstimator, CartesianEstimator, InjectionEstimator,
};
use quillsql::storage::{RowStore, Store};
use quillsql::util::SmallBitset;

fn i4() -> Type {
    Type::integer(TypeCategory::Vectorial, 4)
}

/// Tables A (5 rows), B (10 rows), C (8 rows) in a chain A -- B -- C.
fn setup() -> (Catalog, QueryGraph) {
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();
    for (name, rows) in [("A", 5u64), ("B", 10), ("C", 8)] {
        let table_name = cat.intern(name);
        let id = cat.intern("id");
        let db = cat.get_database_in_use_mut().unwrap();
        let table = db.add_table(table_name).unwrap();
        table.push_back(id, i4()).unwrap();
        let mut store = RowStore::new(vec![i4()]);
        for _ in 0..rows {
            store.append();
        }
        table.set_store(Rc::new(RefCell::new(store)));
    }
    let mut graph = QueryGraph::new();
    let a = graph.add_base_table(cat.intern("A"), None);
    let b = graph.add_base_table(cat.intern("B"), None);
    let c = graph.add_base_table(cat.intern("C"), None);
    graph.add_join(Cnf::empty(), vec![a, b]);
    graph.add_join(Cnf::empty(), vec![a, c]);
    (cat, graph)
}

#[test]
fn test_cartesian_laws() {
    let (cat, graph) = setup();
    let ce = CartesianEstimator;

    let a = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(0));
    let b = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(1));
    assert_eq!(ce.predict_cardinality(&a), 5);
    assert_eq!(ce.predict_cardinality(&b), 10);

    // filter preserves
    let filtered = ce.estimate_filter(&graph, &a, &Cnf::empty());
    assert_eq!(ce.predict_cardinality(&filtered), 5);

    // join multiplies
    let joined = ce.estimate_join(&graph, &a, &b, &Cnf::empty());
    assert_eq!(ce.predict_cardinality(&joined), 50);

    // grouping without keys collapses to one row
    let grouped = ce.estimate_grouping(&graph, &joined, &[]);
    assert_eq!(ce.predict_cardinality(&grouped), 1);

    // limit clamps
    let limited = ce.estimate_limit(&graph, &joined, 7, 0);
    assert_eq!(ce.predict_cardinality(&limited), 7);
    let unlimited = ce.estimate_limit(&graph, &joined, 5000, 0);
    assert_eq!(ce.predict_cardinality(&unlimited), 50);
}

#[test]
fn test_injection_lookup_and_fallback() {
    let (cat, graph) = setup();
    let ce = InjectionEstimator::from_json(
        "db",
        r#"{ "db": [
            { "relations": ["A"], "size": 500 },
            { "relations": ["B", "A"], "size": 1000 }
        ] }"#,
    )
    .unwrap();

    // "A" is injected, "B" falls back to the store row count.
    let a = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(0));
    let b = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(1));
    let c = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(2));
    assert_eq!(ce.predict_cardinality(&a), 500);
    assert_eq!(ce.predict_cardinality(&b), 10);

    // filter never grows the model
    let filtered = ce.estimate_filter(&graph, &a, &Cnf::empty());
    assert_eq!(ce.predict_cardinality(&filtered), 500);

    // the {A, B} entry matches regardless of name order in the document
    let ab = ce.estimate_join(&graph, &a, &b, &Cnf::empty());
    assert_eq!(ce.predict_cardinality(&ab), 1000);

    // {A, C} is absent: cartesian fallback
    let ac = ce.estimate_join(&graph, &a, &c, &Cnf::empty());
    assert_eq!(ce.predict_cardinality(&ac), 4000);

    // limit behaves as for the cartesian model
    assert_eq!(ce.predict_cardinality(&ce.estimate_limit(&graph, &a, 8, 0)), 8);
    assert_eq!(
        ce.predict_cardinality(&ce.estimate_limit(&graph, &a, 5000, 0)),
        500
    );

    // grouping without keys collapses
    assert_eq!(ce.predict_cardinality(&ce.estimate_grouping(&graph, &a, &[])), 1);
}

#[test]
fn test_injection_wrong_database_falls_back_silently() {
    let (cat, graph) = setup();
    let ce = InjectionEstimator::from_json(
        "db",
        r#"{ "somewhere_else": [ { "relations": ["A"], "size": 500 } ] }"#,
    )
    .unwrap();
    let a = ce.estimate_scan(&cat, &graph, SmallBitset::singleton(0));
    assert_eq!(ce.predict_cardinality(&a), 5); // store row count
}

#[test]
fn test_injection_rejects_malformed_documents() {
    assert!(InjectionEstimator::from_json("db", "{ not json").is_err());
}
