// tests/planner/enumerator_test.rs
use std::cell::RefCell;
use std::rc::Rc;

use quillsql::ast::{self, SelectItem, SelectStmt, TableRef};
use quillsql::catalog::{Catalog, Type, TypeCategory};
use quillsql::ir::{AdjacencyMatrix, GraphBuilder, QueryGraph};
use quillsql::planner::cardinality::CartesianEstimator;
use quillsql::planner::enumerator::enumerator_from_name;
use quillsql::planner::plan_table::PlanTable;
use quillsql::planner::Optimizer;
use quillsql::storage::{RowStore, Store};
use quillsql::util::SmallBitset;

fn i4() -> Type {
    Type::integer(TypeCategory::Vectorial, 4)
}

/// The chain setup: `A`(5 rows), `B`(10), `C`(8), `D`(12) joined as
/// `A.id = C.aid AND A.id = D.aid AND B.id = D.bid AND C.id = D.cid`.
fn setup() -> (Catalog, QueryGraph) {
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();
    let tables: [(&str, &[&str], u64); 4] = [
        ("A", &["id"], 5),
        ("B", &["id", "aid"], 10),
        ("C", &["id", "aid"], 8),
        ("D", &["aid", "bid", "cid"], 12),
    ];
    for (name, cols, rows) in tables {
        let table_name = cat.intern(name);
        let cols: Vec<_> = cols.iter().map(|c| cat.intern(c)).collect();
        let db = cat.get_database_in_use_mut().unwrap();
        let table = db.add_table(table_name).unwrap();
        let mut types = Vec::new();
        for col in cols {
            table.push_back(col, i4()).unwrap();
            types.push(i4());
        }
        let mut store = RowStore::new(types);
        for _ in 0..rows {
            store.append();
        }
        table.set_store(Rc::new(RefCell::new(store)));
    }

    let pool = cat.pool();
    let join = |l: &str, lc: &str, r: &str, rc: &str| {
        ast::eq(
            ast::table_col(pool, l, lc, i4()),
            ast::table_col(pool, r, rc, i4()),
        )
    };
    let where_clause = ast::and(
        ast::and(join("A", "id", "C", "aid"), join("A", "id", "D", "aid")),
        ast::and(join("B", "id", "D", "bid"), join("C", "id", "D", "cid")),
    );
    let stmt = SelectStmt {
        from: ["A", "B", "C", "D"]
            .iter()
            .map(|t| TableRef::Table {
                name: cat.intern(t),
                alias: None,
            })
            .collect(),
        where_clause: Some(where_clause),
        select: vec![SelectItem::Star { table: None }],
        ..SelectStmt::default()
    };
    let graph = GraphBuilder::new(&cat).build(&stmt).unwrap();
    (cat, graph)
}

/// `(subproblem, size, cost)` rows the DP must produce with cartesian
/// estimates; bit indices 0=A, 1=B, 2=C, 3=D.
const EXPECTED: [(u64, u64, u64); 12] = [
    (0b0001, 5, 0),
    (0b0010, 10, 0),
    (0b0100, 8, 0),
    (0b1000, 12, 0),
    (0b0101, 40, 13),
    (0b1001, 60, 17),
    (0b1010, 120, 22),
    (0b1100, 96, 20),
    (0b1011, 600, 87),
    (0b1101, 480, 65),
    (0b1110, 960, 126),
    (0b1111, 4800, 195),
];

const ALL_ENUMERATORS: [&str; 5] = ["DPsize", "DPsizeOpt", "DPsub", "DPsubOpt", "DPccp"];

fn run(name: &str) -> (QueryGraph, PlanTable) {
    let (cat, graph) = setup();
    let enumerator = enumerator_from_name(name).unwrap();
    let estimator = CartesianEstimator;
    let optimizer = Optimizer::new(enumerator.as_ref(), &estimator);
    let (_, table) = optimizer.optimize(&cat, &graph).unwrap();
    (graph, table)
}

#[test]
fn test_chain_query_plan_table() {
    for name in ALL_ENUMERATORS {
        let (_, table) = run(name);
        for (raw, size, cost) in EXPECTED {
            let s = SmallBitset::from_raw(raw);
            let entry = &table[s];
            assert_eq!(entry.size, size, "{name}: size of {s}");
            assert_eq!(entry.cost, cost, "{name}: cost of {s}");
            if s.len() >= 2 {
                assert_eq!(entry.left | entry.right, s, "{name}: split covers {s}");
                assert!((entry.left & entry.right).is_empty());
            }
        }
        // disconnected subproblems stay unplanned
        for raw in [0b0011u64, 0b0110, 0b0111] {
            assert!(
                !table[SmallBitset::from_raw(raw)].has_plan(),
                "{name}: {raw:#b} is not connected"
            );
        }
    }
}

#[test]
fn test_all_enumerators_agree() {
    let reference = run("DPsize").1;
    for &name in &ALL_ENUMERATORS[1..] {
        let table = run(name).1;
        assert_eq!(
            reference, table,
            "{name} disagrees with DPsize on the chain query"
        );
    }
}

#[test]
fn test_plan_table_monotonicity() {
    for name in ALL_ENUMERATORS {
        let (graph, table) = run(name);
        let matrix = AdjacencyMatrix::build(&graph).unwrap();
        let n = graph.num_sources();
        for raw in 1..(1u64 << n) {
            let s = SmallBitset::from_raw(raw);
            if s.len() < 2 || !matrix.is_connected(s) {
                continue;
            }
            let mut left = SmallBitset::empty().next_subset(s);
            while left != s {
                let right = s - left;
                let valid = matrix.is_connected(left)
                    && matrix.is_connected(right)
                    && matrix.is_connected_pair(left, right);
                if valid {
                    let bound = table[left]
                        .cost
                        .saturating_add(table[right].cost)
                        .saturating_add(table[left].size)
                        .saturating_add(table[right].size);
                    assert!(
                        table[s].cost <= bound,
                        "{name}: {s} beats split ({left}, {right})"
                    );
                }
                left = left.next_subset(s);
            }
        }
    }
}

#[test]
fn test_unknown_enumerator_name() {
    assert!(enumerator_from_name("GreedyOperatorOrdering").is_err());
}
