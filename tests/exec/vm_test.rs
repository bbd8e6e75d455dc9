// tests/exec/vm_test.rs
use std::rc::Rc;

use quillsql::ast::{self, BinOp, Expr};
use quillsql::catalog::{Catalog, Ident, Schema, Type, TypeCategory};
use quillsql::error::ExecError;
use quillsql::exec::value::{Tuple, Value};
use quillsql::exec::vm::{ExprCompiler, Op, StackMachine};

fn eval(
    catalog: &Catalog,
    schema: &Schema,
    tuple: &mut Tuple,
    expr: &Rc<Expr>,
) -> Result<(Value, bool), ExecError> {
    let mut machine = StackMachine::new();
    let mut compiler = ExprCompiler::new(&mut machine, schema, catalog, 0);
    compiler.compile(expr)?;
    machine.run(&mut [tuple])?;
    Ok(machine.top())
}

fn empty_input() -> (Schema, Tuple) {
    (Schema::new(), Tuple::with_len(0))
}

#[test]
fn test_strcmp_returns_sign() {
    let mut machine = StackMachine::new();
    machine.add_and_emit_load(Value::Str(Rc::from("abc")));
    machine.add_and_emit_load(Value::Str(Rc::from("abd")));
    machine.emit(Op::CmpS);
    machine.run(&mut []).unwrap();
    let (v, null) = machine.top();
    assert!(!null);
    assert!(v.as_int() < 0);
}

#[test]
fn test_like_opcode() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let matched = ast::binary(BinOp::Like, ast::lit_str("axbyzc"), ast::lit_str("a_b__c"));
    let (v, null) = eval(&cat, &schema, &mut tuple, &matched).unwrap();
    assert!(!null);
    assert!(v.as_bool());

    let escaped = ast::binary(
        BinOp::Like,
        ast::lit_str("xyz_u%vw"),
        ast::lit_str("%\\__\\%%"),
    );
    let (v, _) = eval(&cat, &schema, &mut tuple, &escaped).unwrap();
    assert!(v.as_bool());

    // an invalid escape aborts the evaluation
    let broken = ast::binary(BinOp::Like, ast::lit_str("abc"), ast::lit_str("ab\\c"));
    assert!(matches!(
        eval(&cat, &schema, &mut tuple, &broken),
        Err(ExecError::InvalidEscape(_))
    ));
}

#[test]
fn test_kleene_logic() {
    // (lhs, rhs, value, is_null) per AND and OR
    let cases_and = [
        (Some(true), Some(true), true, false),
        (Some(true), Some(false), false, false),
        (None, Some(false), false, false), // NULL AND FALSE = FALSE
        (None, Some(true), false, true),   // NULL AND TRUE = NULL
        (None, None, false, true),
    ];
    for (l, r, value, null) in cases_and {
        let mut machine = StackMachine::new();
        push_bool(&mut machine, l);
        push_bool(&mut machine, r);
        machine.emit(Op::AndB);
        machine.run(&mut []).unwrap();
        let (v, n) = machine.top();
        assert_eq!(n, null, "{l:?} AND {r:?}");
        if !null {
            assert_eq!(v.as_bool(), value, "{l:?} AND {r:?}");
        }
    }

    let cases_or = [
        (Some(false), Some(false), false, false),
        (Some(false), Some(true), true, false),
        (None, Some(true), true, false), // NULL OR TRUE = TRUE
        (None, Some(false), false, true), // NULL OR FALSE = NULL
        (None, None, false, true),
    ];
    for (l, r, value, null) in cases_or {
        let mut machine = StackMachine::new();
        push_bool(&mut machine, l);
        push_bool(&mut machine, r);
        machine.emit(Op::OrB);
        machine.run(&mut []).unwrap();
        let (v, n) = machine.top();
        assert_eq!(n, null, "{l:?} OR {r:?}");
        if !null {
            assert_eq!(v.as_bool(), value, "{l:?} OR {r:?}");
        }
    }
}

fn push_bool(machine: &mut StackMachine, v: Option<bool>) {
    match v {
        Some(b) => {
            machine.add_and_emit_load(Value::Bool(b));
        }
        None => machine.emit(Op::PushNull),
    }
}

#[test]
fn test_null_propagates_through_arithmetic() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let e = ast::binary(BinOp::Add, ast::lit_int(1), ast::lit_null());
    let (_, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(null);
}

#[test]
fn test_division_by_zero_yields_null() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let e = ast::binary(BinOp::Div, ast::lit_int(7), ast::lit_int(0));
    let (_, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(null);
}

fn decimal_schema(cat: &Catalog) -> (Schema, Tuple) {
    // T.d DECIMAL(8, 2), T.e DECIMAL(8, 2)
    let dec = Type::decimal(TypeCategory::Vectorial, 8, 2);
    let mut schema = Schema::new();
    schema
        .add(Ident::qualified(cat.intern("T"), cat.intern("d")), dec.clone())
        .unwrap();
    schema
        .add(Ident::qualified(cat.intern("T"), cat.intern("e")), dec)
        .unwrap();
    let mut tuple = Tuple::with_len(2);
    tuple.set(0, Value::Int(150)); // 1.50
    tuple.set(1, Value::Int(250)); // 2.50
    (schema, tuple)
}

#[test]
fn test_decimal_addition_rescales_integers() {
    let cat = Catalog::new();
    let (schema, mut tuple) = decimal_schema(&cat);
    let dec = Type::decimal(TypeCategory::Vectorial, 8, 2);
    // d + 1 : the integer is scaled up by 10^2 before the add
    let e = ast::binary(
        BinOp::Add,
        ast::table_col(cat.pool(), "T", "d", dec.clone()),
        ast::lit_int(1),
    );
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert_eq!(v.as_int(), 250); // 2.50
}

#[test]
fn test_decimal_multiplication_scales_back_down() {
    let cat = Catalog::new();
    let (schema, mut tuple) = decimal_schema(&cat);
    let dec = Type::decimal(TypeCategory::Vectorial, 8, 2);
    // d * e = 1.50 * 2.50 = 3.75 -> 375 at scale 2
    let e = ast::binary(
        BinOp::Mul,
        ast::table_col(cat.pool(), "T", "d", dec.clone()),
        ast::table_col(cat.pool(), "T", "e", dec),
    );
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert_eq!(v.as_int(), 375);
}

#[test]
fn test_decimal_division_keeps_scale() {
    let cat = Catalog::new();
    let (schema, mut tuple) = decimal_schema(&cat);
    let dec = Type::decimal(TypeCategory::Vectorial, 8, 2);
    // e / d = 2.50 / 1.50 = 1.66 -> 166 at scale 2
    let e = ast::binary(
        BinOp::Div,
        ast::table_col(cat.pool(), "T", "e", dec.clone()),
        ast::table_col(cat.pool(), "T", "d", dec),
    );
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert_eq!(v.as_int(), 166);
}

#[test]
fn test_mixed_numeric_comparison_casts() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    // 1 < 1.5 joins to double
    let e = ast::binary(BinOp::Lt, ast::lit_int(1), ast::lit_float(1.5));
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert!(v.as_bool());
}

#[test]
fn test_string_concatenation() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let e = ast::binary(BinOp::Cat, ast::lit_str("foo"), ast::lit_str("bar"));
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert_eq!(v.as_str(), "foobar");
}

#[test]
fn test_is_null_intrinsic() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let e = ast::fn_call("isnull", vec![ast::lit_null()]);
    let (v, null) = eval(&cat, &schema, &mut tuple, &e).unwrap();
    assert!(!null);
    assert!(v.as_bool());
}

#[test]
fn test_udf_applications_are_rejected() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    // an unknown function name resolves to a UDF, which the backend refuses
    let e = ast::fn_call("soundex", vec![ast::lit_str("abc")]);
    assert!(matches!(
        eval(&cat, &schema, &mut tuple, &e),
        Err(ExecError::Unsupported(_))
    ));
}

#[test]
fn test_unknown_identifier_is_reported() {
    let cat = Catalog::new();
    let (schema, mut tuple) = empty_input();
    let e = ast::table_col(cat.pool(), "T", "missing", Type::integer(TypeCategory::Vectorial, 4));
    assert!(matches!(
        eval(&cat, &schema, &mut tuple, &e),
        Err(ExecError::UnknownIdentifier(_))
    ));
}
