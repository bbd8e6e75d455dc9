// tests/exec/pipeline_test.rs
use std::rc::Rc;

use quillsql::ast::{
    self, BinOp, ColumnDef, CreateTableStmt, Fnid, InsertStmt, Literal, SelectItem, SelectStmt,
    TableRef,
};
use quillsql::catalog::{Catalog, Type, TypeCategory};
use quillsql::exec::Sink;
use quillsql::exec::value::Value;
use quillsql::{Engine, EngineOptions};

fn i4() -> Type {
    Type::integer(TypeCategory::Vectorial, 4)
}

fn c8() -> Type {
    Type::char(TypeCategory::Vectorial, 8)
}

/// Creates A(id, val) and B(id, aid) and loads a small data set:
///
/// A: (1, 10), (2, 20), (3, 20), (4, NULL)
/// B: (1, 1), (2, 1), (3, 2), (4, 9)
fn setup(engine: &Engine) -> Catalog {
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();

    let a = CreateTableStmt {
        table: cat.intern("A"),
        columns: vec![
            ColumnDef {
                name: cat.intern("id"),
                ty: i4(),
                not_null: false,
                primary_key: true,
            },
            ColumnDef {
                name: cat.intern("val"),
                ty: i4(),
                not_null: false,
                primary_key: false,
            },
        ],
    };
    engine.execute_create_table(&mut cat, &a).unwrap();
    let b = CreateTableStmt {
        table: cat.intern("B"),
        columns: vec![
            ColumnDef {
                name: cat.intern("id"),
                ty: i4(),
                not_null: false,
                primary_key: true,
            },
            ColumnDef {
                name: cat.intern("aid"),
                ty: i4(),
                not_null: false,
                primary_key: false,
            },
        ],
    };
    engine.execute_create_table(&mut cat, &b).unwrap();

    let rows_a = InsertStmt {
        table: cat.intern("A"),
        rows: vec![
            vec![Literal::Int(1), Literal::Int(10)],
            vec![Literal::Int(2), Literal::Int(20)],
            vec![Literal::Int(3), Literal::Int(20)],
            vec![Literal::Int(4), Literal::Null],
        ],
    };
    engine.execute_insert(&cat, &rows_a).unwrap();
    let rows_b = InsertStmt {
        table: cat.intern("B"),
        rows: vec![
            vec![Literal::Int(1), Literal::Int(1)],
            vec![Literal::Int(2), Literal::Int(1)],
            vec![Literal::Int(3), Literal::Int(2)],
            vec![Literal::Int(4), Literal::Int(9)],
        ],
    };
    engine.execute_insert(&cat, &rows_b).unwrap();
    cat
}

fn from_table(cat: &Catalog, name: &str) -> TableRef {
    TableRef::Table {
        name: cat.intern(name),
        alias: None,
    }
}

/// Runs a statement and collects every result row as integers
/// (NULL becomes `None`).
fn collect(engine: &Engine, cat: &Catalog, stmt: &SelectStmt) -> Vec<Vec<Option<i64>>> {
    let mut rows = Vec::new();
    {
        let mut callback = |_schema: &quillsql::catalog::Schema, t: &quillsql::exec::value::Tuple| {
            let row = (0..t.len())
                .map(|i| {
                    if t.is_null(i) {
                        None
                    } else {
                        Some(match t.value(i) {
                            Value::Int(v) => *v,
                            Value::Double(d) => (*d * 100.0).round() as i64,
                            Value::Bool(b) => i64::from(*b),
                            other => panic!("unexpected value {other:?}"),
                        })
                    }
                })
                .collect();
            rows.push(row);
        };
        engine
            .execute_select(cat, stmt, Sink::Callback(&mut callback))
            .unwrap();
    }
    rows
}

#[test]
fn test_filter_and_projection() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT A.id FROM A WHERE A.val = 20
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(ast::table_col(pool, "A", "val", i4()), ast::lit_int(20))),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "A", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    // the NULL row does not pass the filter
    assert_eq!(rows, vec![vec![Some(2)], vec![Some(3)]]);
}

#[test]
fn test_group_by_with_aggregates() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT COUNT(*), SUM(A.id), AVG(A.id) FROM A GROUP BY A.val
    let count = ast::count_star();
    let sum = ast::fn_app(Fnid::Sum, vec![ast::table_col(pool, "A", "id", i4())]);
    let avg = ast::fn_app(Fnid::Avg, vec![ast::table_col(pool, "A", "id", i4())]);
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        group_by: vec![ast::table_col(pool, "A", "val", i4())],
        select: vec![
            SelectItem::Expr { expr: count, alias: None },
            SelectItem::Expr { expr: sum, alias: None },
            SelectItem::Expr { expr: avg, alias: None },
        ],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    // groups: val=10 -> (1, 1, 1.0), val=20 -> (2, 5, 2.5), val=NULL -> (1, 4, 4.0)
    // AVG values are scaled by 100 in `collect`.
    assert_eq!(
        rows,
        vec![
            vec![Some(1), Some(1), Some(100)],
            vec![Some(1), Some(4), Some(400)],
            vec![Some(2), Some(5), Some(250)],
        ]
    );
}

#[test]
fn test_aggregation_without_keys() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT COUNT(A.val), MIN(A.val), MAX(A.val) FROM A
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        select: vec![
            SelectItem::Expr {
                expr: ast::fn_app(Fnid::Count, vec![ast::table_col(pool, "A", "val", i4())]),
                alias: None,
            },
            SelectItem::Expr {
                expr: ast::fn_app(Fnid::Min, vec![ast::table_col(pool, "A", "val", i4())]),
                alias: None,
            },
            SelectItem::Expr {
                expr: ast::fn_app(Fnid::Max, vec![ast::table_col(pool, "A", "val", i4())]),
                alias: None,
            },
        ],
        ..SelectStmt::default()
    };
    let rows = collect(&engine, &cat, &stmt);
    // COUNT skips the NULL, MIN/MAX ignore it
    assert_eq!(rows, vec![vec![Some(3), Some(10), Some(20)]]);
}

#[test]
fn test_order_by_with_limit_and_offset() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT A.id FROM A ORDER BY A.id DESC LIMIT 2 OFFSET 1
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "A", "id", i4()),
            alias: None,
        }],
        order_by: vec![(ast::table_col(pool, "A", "id", i4()), false)],
        limit: Some(quillsql::ast::LimitClause { limit: 2, offset: 1 }),
        ..SelectStmt::default()
    };
    let rows = collect(&engine, &cat, &stmt);
    assert_eq!(rows, vec![vec![Some(3)], vec![Some(2)]]);
}

#[test]
fn test_hash_join_and_nested_loops_agree() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();

    // Equi join (simple hash join): SELECT A.id, B.id FROM A, B WHERE A.id = B.aid
    let equi = SelectStmt {
        from: vec![from_table(&cat, "A"), from_table(&cat, "B")],
        where_clause: Some(ast::eq(
            ast::table_col(pool, "A", "id", i4()),
            ast::table_col(pool, "B", "aid", i4()),
        )),
        select: vec![
            SelectItem::Expr {
                expr: ast::table_col(pool, "A", "id", i4()),
                alias: None,
            },
            SelectItem::Expr {
                expr: ast::table_col(pool, "B", "id", i4()),
                alias: None,
            },
        ],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &equi);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![Some(1), Some(1)],
            vec![Some(1), Some(2)],
            vec![Some(2), Some(3)],
        ]
    );

    // The same join written so it cannot hash: (A.id = B.aid OR A.id = B.aid)
    // has two literals in its clause and must run as nested loops.
    let pred = ast::or(
        ast::eq(
            ast::table_col(pool, "A", "id", i4()),
            ast::table_col(pool, "B", "aid", i4()),
        ),
        ast::eq(
            ast::table_col(pool, "A", "id", i4()),
            ast::table_col(pool, "B", "aid", i4()),
        ),
    );
    let nested = SelectStmt {
        where_clause: Some(pred),
        ..equi.clone()
    };
    let mut nested_rows = collect(&engine, &cat, &nested);
    nested_rows.sort();
    assert_eq!(rows, nested_rows);
}

#[test]
fn test_non_equi_join_runs_nested_loops() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT A.id, B.id FROM A, B WHERE A.id < B.aid
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A"), from_table(&cat, "B")],
        where_clause: Some(ast::binary(
            BinOp::Lt,
            ast::table_col(pool, "A", "id", i4()),
            ast::table_col(pool, "B", "aid", i4()),
        )),
        select: vec![
            SelectItem::Expr {
                expr: ast::table_col(pool, "A", "id", i4()),
                alias: None,
            },
            SelectItem::Expr {
                expr: ast::table_col(pool, "B", "id", i4()),
                alias: None,
            },
        ],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![Some(1), Some(3)], // 1 < 2
            vec![Some(1), Some(4)], // 1 < 9
            vec![Some(2), Some(4)],
            vec![Some(3), Some(4)],
            vec![Some(4), Some(4)],
        ]
    );
}

#[test]
fn test_column_store_scans() {
    let engine = Engine::with_options(EngineOptions {
        store: "ColumnStore".into(),
        ..EngineOptions::default()
    })
    .unwrap();
    let cat = setup(&engine);
    let pool = cat.pool();
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(ast::table_col(pool, "A", "val", i4()), ast::lit_int(20))),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "A", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    assert_eq!(rows, vec![vec![Some(2)], vec![Some(3)]]);
}

#[test]
fn test_character_columns_and_like_filter() {
    let engine = Engine::new();
    let mut cat = Catalog::new();
    cat.add_database("db").unwrap();
    cat.set_database_in_use("db").unwrap();
    let stmt = CreateTableStmt {
        table: cat.intern("S"),
        columns: vec![
            ColumnDef {
                name: cat.intern("id"),
                ty: i4(),
                not_null: false,
                primary_key: true,
            },
            ColumnDef {
                name: cat.intern("name"),
                ty: c8(),
                not_null: false,
                primary_key: false,
            },
        ],
    };
    engine.execute_create_table(&mut cat, &stmt).unwrap();
    engine
        .execute_insert(
            &cat,
            &InsertStmt {
                table: cat.intern("S"),
                rows: vec![
                    vec![Literal::Int(1), Literal::Str("apple".into())],
                    vec![Literal::Int(2), Literal::Str("apricot".into())],
                    vec![Literal::Int(3), Literal::Str("banana".into())],
                ],
            },
        )
        .unwrap();

    let pool = cat.pool();
    // SELECT S.id FROM S WHERE S.name LIKE "ap%"
    let select = SelectStmt {
        from: vec![from_table(&cat, "S")],
        where_clause: Some(ast::binary(
            BinOp::Like,
            ast::table_col(pool, "S", "name", c8()),
            ast::lit_str("ap%"),
        )),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "S", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let mut rows = Vec::new();
    {
        let mut callback = |_: &quillsql::catalog::Schema, t: &quillsql::exec::value::Tuple| {
            rows.push(t.get(0).as_int());
        };
        engine
            .execute_select(&cat, &select, Sink::Callback(&mut callback))
            .unwrap();
    }
    rows.sort_unstable();
    assert_eq!(rows, vec![1, 2]);
}

#[test]
fn test_noop_sink_counts_rows() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        select: vec![SelectItem::Star { table: None }],
        ..SelectStmt::default()
    };
    let rows = engine.execute_select(&cat, &stmt, Sink::NoOp).unwrap();
    assert_eq!(rows, 4);
}

#[test]
fn test_three_way_chain_join() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // Self-style chain over A, B and B again under an alias.
    let stmt = SelectStmt {
        from: vec![
            from_table(&cat, "A"),
            from_table(&cat, "B"),
            TableRef::Table {
                name: cat.intern("B"),
                alias: Some(cat.intern("B2")),
            },
        ],
        where_clause: Some(ast::and(
            ast::eq(
                ast::table_col(pool, "A", "id", i4()),
                ast::table_col(pool, "B", "aid", i4()),
            ),
            ast::eq(
                ast::table_col(pool, "B", "id", i4()),
                ast::table_col(pool, "B2", "aid", i4()),
            ),
        )),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "B2", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    // A.id=B.aid pairs: (1,B1), (1,B2), (2,B3); B.id=B2.aid:
    // B1 -> B2.id 1,2 ; B2 -> B2.id 3 ; B3 -> none
    assert_eq!(
        rows,
        vec![vec![Some(1)], vec![Some(2)], vec![Some(3)]]
    );
}

#[test]
fn test_decorrelated_subquery_end_to_end() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT A.id FROM A WHERE A.id = (SELECT MIN(B.aid) FROM B WHERE A.id = B.aid)
    let outer_a_id = ast::table_col(pool, "A", "id", i4());
    let inner = Rc::new(SelectStmt {
        from: vec![from_table(&cat, "B")],
        where_clause: Some(ast::eq(
            ast::outer_col(pool, "A", "id", Rc::clone(&outer_a_id)),
            ast::table_col(pool, "B", "aid", i4()),
        )),
        select: vec![SelectItem::Expr {
            expr: ast::fn_app(Fnid::Min, vec![ast::table_col(pool, "B", "aid", i4())]),
            alias: None,
        }],
        ..SelectStmt::default()
    });
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        where_clause: Some(ast::eq(
            ast::table_col(pool, "A", "id", i4()),
            ast::query_expr(inner, Type::integer(TypeCategory::Scalar, 4)),
        )),
        select: vec![SelectItem::Expr {
            expr: ast::table_col(pool, "A", "id", i4()),
            alias: None,
        }],
        ..SelectStmt::default()
    };
    let mut rows = collect(&engine, &cat, &stmt);
    rows.sort();
    // B.aid values: 1, 1, 2, 9 -> groups 1, 2, 9; A.id matching its own
    // group minimum: 1 and 2.
    assert_eq!(rows, vec![vec![Some(1)], vec![Some(2)]]);
}

#[test]
fn test_ordered_grouping_over_sorted_input() {
    use quillsql::ops::{GroupingAlgo, OperatorNode};

    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    let db = cat.get_database_in_use().unwrap();
    let table = db.get_table(&cat.intern("A")).unwrap();

    // Scan -> Sorting(A.val) -> Grouping(Ordered, keys A.val, COUNT(*)).
    let scan = OperatorNode::scan(table, cat.intern("A"));
    let mut sorting = OperatorNode::sorting(
        vec![(ast::table_col(pool, "A", "val", i4()), true)],
        scan.schema().clone(),
    );
    sorting.add_child(scan);
    let mut grouping = OperatorNode::grouping(
        &cat,
        vec![ast::table_col(pool, "A", "val", i4())],
        vec![ast::count_star()],
        GroupingAlgo::Ordered,
    );
    grouping.add_child(sorting);
    let mut root = OperatorNode::callback();
    root.add_child(grouping);

    let mut rows: Vec<(Option<i64>, i64)> = Vec::new();
    {
        let mut callback = |_: &quillsql::catalog::Schema, t: &quillsql::exec::value::Tuple| {
            let key = if t.is_null(0) { None } else { Some(t.get(0).as_int()) };
            rows.push((key, t.get(1).as_int()));
        };
        quillsql::exec::execute(&cat, &root, Sink::Callback(&mut callback)).unwrap();
    }
    // Runs arrive in sort order; the NULL key forms its own run.
    assert_eq!(rows, vec![(Some(10), 1), (Some(20), 2), (None, 1)]);
}

#[test]
fn test_having_filters_groups() {
    let engine = Engine::new();
    let cat = setup(&engine);
    let pool = cat.pool();
    // SELECT A.val, COUNT(*) FROM A GROUP BY A.val HAVING COUNT(*) > 1
    let stmt = SelectStmt {
        from: vec![from_table(&cat, "A")],
        group_by: vec![ast::table_col(pool, "A", "val", i4())],
        having: Some(ast::binary(BinOp::Gt, ast::count_star(), ast::lit_int(1))),
        select: vec![
            SelectItem::Expr {
                expr: ast::table_col(pool, "A", "val", i4()),
                alias: None,
            },
            SelectItem::Expr {
                expr: ast::count_star(),
                alias: None,
            },
        ],
        ..SelectStmt::default()
    };
    let rows = collect(&engine, &cat, &stmt);
    assert_eq!(rows, vec![vec![Some(20), Some(2)]]);
}
