//! The expression virtual machine.
//!
//! A [`StackMachine`] evaluates a compiled opcode sequence over up to two
//! tuples, a context of constants, and the byte regions of a store.  The
//! dispatch is one large `match` in a tight loop; the match compiles to a
//! jump table.  A parallel null-bit stack carries NULLness beside the value
//! stack.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::cnf::Cnf;
use crate::ast::{BinOp, Expr, Fnid, Literal, UnOp};
use crate::catalog::types::{arithmetic_join, NumericKind, Type};
use crate::catalog::{Catalog, Ident, Schema};
use crate::error::ExecError;
use crate::exec::value::{Tuple, Value};
use crate::storage::{get_bit, set_bit, Store};
use crate::util::like::like;

/// The memory access width of a store load or store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemTy {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Char(usize),
}

impl MemTy {
    fn of(ty: &Type) -> Result<MemTy, ExecError> {
        Ok(match ty {
            Type::Boolean { .. } => MemTy::Bool,
            Type::Char { length, .. } => MemTy::Char(*length),
            Type::Numeric { kind, precision, .. } => match kind {
                NumericKind::Int => match precision {
                    1 => MemTy::I8,
                    2 => MemTy::I16,
                    4 => MemTy::I32,
                    8 => MemTy::I64,
                    _ => return Err(ExecError::IllTyped(ty.to_string())),
                },
                NumericKind::Float if *precision == 32 => MemTy::F32,
                NumericKind::Float => MemTy::F64,
                NumericKind::Decimal => MemTy::I64,
            },
            Type::Date { .. } => MemTy::I32,
            Type::DateTime { .. } => MemTy::I64,
            _ => return Err(ExecError::IllTyped(ty.to_string())),
        })
    }
}

/// One opcode.  Operands are embedded in the variant.
#[derive(Clone, Debug)]
pub enum Op {
    /*----- Control flow -----*/
    /// Stop evaluation when the top of stack is integer zero.
    StopZ,
    /// Stop evaluation when the top of stack is integer non-zero.
    StopNZ,
    /// Stop evaluation when the top of stack is FALSE.
    StopFalse,
    /// Stop evaluation when the top of stack is TRUE.
    StopTrue,
    /// Skip the next `n` opcodes when the popped top of stack is zero.
    SkipZ(usize),
    /// Skip the next `n` opcodes when the popped top of stack is non-zero.
    SkipNZ(usize),

    /*----- Stack manipulation -----*/
    Pop,
    PushNull,

    /*----- Tuple access -----*/
    LdTup { tuple: usize, index: usize },
    StTup { tuple: usize, index: usize },

    /*----- Context access -----*/
    LdCtx(usize),
    UpdCtx(usize),

    /*----- Store access; offsets in bits on the stack -----*/
    /// Stack `[.., null_off, value_off]` -> `[.., value]`.  The NULL bit and
    /// the value may live in different regions (column stores).
    LdMem {
        region: usize,
        null_region: usize,
        ty: MemTy,
    },
    /// Stack `[.., value, null_off, value_off]` -> `[..]`.
    StMem {
        region: usize,
        null_region: usize,
        ty: MemTy,
    },

    /*----- Arithmetic -----*/
    Inc,
    Dec,
    NegI,
    MinusI,
    MinusF,
    MinusD,
    AddI,
    AddF,
    AddD,
    SubI,
    SubF,
    SubD,
    MulI,
    MulF,
    MulD,
    DivI,
    DivF,
    DivD,
    ModI,
    AndI,
    CatS,

    /*----- Logic (three-valued) -----*/
    NotB,
    AndB,
    OrB,

    /*----- Comparison -----*/
    EqI,
    EqF,
    EqD,
    EqB,
    EqS,
    NeI,
    NeF,
    NeD,
    NeB,
    NeS,
    LtI,
    LtF,
    LtD,
    LtS,
    GtI,
    GtF,
    GtD,
    GtS,
    LeI,
    LeF,
    LeD,
    LeS,
    GeI,
    GeF,
    GeD,
    GeS,
    /// Three-way comparison, pushes -1/0/1 as integer.
    CmpI,
    CmpF,
    CmpD,
    CmpB,
    CmpS,

    /*----- Intrinsics -----*/
    IsNull,
    /// `Cast<to><from>`: CastIF casts float to int, and so on.
    CastIF,
    CastID,
    CastIB,
    CastFI,
    CastFD,
    CastDI,
    CastDF,
    Like,
}

#[derive(Default)]
pub struct StackMachine {
    ops: Vec<Op>,
    context: Vec<Value>,
    regions: Vec<Rc<RefCell<Vec<u8>>>>,
    values: Vec<Value>,
    nulls: Vec<bool>,
}

impl StackMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Adds a value to the context and returns its index.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.context.push(value);
        self.context.len() - 1
    }

    pub fn set_context(&mut self, idx: usize, value: Value) {
        assert!(idx < self.context.len(), "index out of bounds");
        self.context[idx] = value;
    }

    pub fn context(&self, idx: usize) -> &Value {
        &self.context[idx]
    }

    /// Adds a value to the context and emits a load for it.
    pub fn add_and_emit_load(&mut self, value: Value) -> usize {
        let idx = self.add_constant(value);
        self.emit(Op::LdCtx(idx));
        idx
    }

    /// Registers a store region for the memory opcodes.
    pub fn add_region(&mut self, region: Rc<RefCell<Vec<u8>>>) -> usize {
        self.regions.push(region);
        self.regions.len() - 1
    }

    /// The top of stack after the last run.
    pub fn top(&self) -> (Value, bool) {
        let i = self.values.len() - 1;
        (self.values[i].clone(), self.nulls[i])
    }

    fn push(&mut self, value: Value, null: bool) {
        self.values.push(value);
        self.nulls.push(null);
    }

    fn pop(&mut self) -> (Value, bool) {
        let v = self.values.pop().expect("value stack underflow");
        let n = self.nulls.pop().expect("null stack underflow");
        (v, n)
    }

    /// Evaluates the opcode sequence over `tuples`.
    pub fn run(&mut self, tuples: &mut [&mut Tuple]) -> Result<(), ExecError> {
        self.values.clear();
        self.nulls.clear();

        macro_rules! binary {
            ($as:ident, $wrap:path, $default:expr, |$l:ident, $r:ident| $body:expr) => {{
                let (rv, rn) = self.pop();
                let (lv, ln) = self.pop();
                if ln || rn {
                    self.push($default, true);
                } else {
                    let $l = lv.$as();
                    let $r = rv.$as();
                    self.push($wrap($body), false);
                }
            }};
        }

        macro_rules! cmp3 {
            ($as:ident) => {{
                let (rv, rn) = self.pop();
                let (lv, ln) = self.pop();
                if ln || rn {
                    self.push(Value::Int(0), true);
                } else {
                    let l = lv.$as();
                    let r = rv.$as();
                    let c = i64::from(l >= r) - i64::from(l <= r);
                    self.push(Value::Int(c), false);
                }
            }};
        }

        let mut pc = 0usize;
        while pc < self.ops.len() {
            let op = self.ops[pc].clone();
            pc += 1;
            match op {
                /*----- Control flow; a NULL on top counts as zero/FALSE. -*/
                Op::StopZ => {
                    let (v, n) = self.top();
                    if n || v.as_int() == 0 {
                        break;
                    }
                }
                Op::StopNZ => {
                    let (v, n) = self.top();
                    if !n && v.as_int() != 0 {
                        break;
                    }
                }
                Op::StopFalse => {
                    let (v, n) = self.top();
                    if n || !v.as_bool() {
                        break;
                    }
                }
                Op::StopTrue => {
                    let (v, n) = self.top();
                    if !n && v.as_bool() {
                        break;
                    }
                }
                Op::SkipZ(n) => {
                    let (v, _) = self.pop();
                    if v.as_int() == 0 {
                        pc += n;
                    }
                }
                Op::SkipNZ(n) => {
                    let (v, _) = self.pop();
                    if v.as_int() != 0 {
                        pc += n;
                    }
                }

                /*----- Stack manipulation -------------------------------*/
                Op::Pop => {
                    self.pop();
                }
                Op::PushNull => self.push(Value::Int(0), true),

                /*----- Tuple access -------------------------------------*/
                Op::LdTup { tuple, index } => {
                    let t = &tuples[tuple];
                    self.push(t.value(index).clone(), t.is_null(index));
                }
                Op::StTup { tuple, index } => {
                    let (v, n) = self.top();
                    tuples[tuple].set_with_null(index, v, n);
                }

                /*----- Context access -----------------------------------*/
                Op::LdCtx(idx) => {
                    let v = self.context[idx].clone();
                    self.push(v, false);
                }
                Op::UpdCtx(idx) => {
                    let (v, _) = self.top();
                    self.context[idx] = v;
                }

                /*----- Store access -------------------------------------*/
                Op::LdMem {
                    region,
                    null_region,
                    ty,
                } => {
                    let (voff, _) = self.pop();
                    let (noff, _) = self.pop();
                    let null = {
                        let bitmap = self.regions[null_region].borrow();
                        // cleared bit means NULL
                        !get_bit(&bitmap, noff.as_int() as u64)
                    };
                    if null {
                        self.push(mem_default(ty), true);
                    } else {
                        let region = Rc::clone(&self.regions[region]);
                        let data = region.borrow();
                        self.push(load_mem(ty, &data, voff.as_int() as u64), false);
                    }
                }
                Op::StMem {
                    region,
                    null_region,
                    ty,
                } => {
                    let (voff, _) = self.pop();
                    let (noff, _) = self.pop();
                    let (value, null) = self.pop();
                    {
                        let mut bitmap = self.regions[null_region].borrow_mut();
                        set_bit(&mut bitmap, noff.as_int() as u64, !null);
                    }
                    if !null {
                        let region = Rc::clone(&self.regions[region]);
                        let mut data = region.borrow_mut();
                        store_mem(ty, &mut data, voff.as_int() as u64, &value);
                    }
                }

                /*----- Arithmetic ---------------------------------------*/
                Op::Inc => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(v.as_int().wrapping_add(1)), n);
                }
                Op::Dec => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(v.as_int().wrapping_sub(1)), n);
                }
                Op::NegI => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(!v.as_int()), n);
                }
                Op::MinusI => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(v.as_int().wrapping_neg()), n);
                }
                Op::MinusF => {
                    let (v, n) = self.pop();
                    self.push(Value::Float(-v.as_float()), n);
                }
                Op::MinusD => {
                    let (v, n) = self.pop();
                    self.push(Value::Double(-v.as_double()), n);
                }
                Op::AddI => binary!(as_int, Value::Int, Value::Int(0), |l, r| l.wrapping_add(r)),
                Op::AddF => binary!(as_float, Value::Float, Value::Float(0.0), |l, r| l + r),
                Op::AddD => binary!(as_double, Value::Double, Value::Double(0.0), |l, r| l + r),
                Op::SubI => binary!(as_int, Value::Int, Value::Int(0), |l, r| l.wrapping_sub(r)),
                Op::SubF => binary!(as_float, Value::Float, Value::Float(0.0), |l, r| l - r),
                Op::SubD => binary!(as_double, Value::Double, Value::Double(0.0), |l, r| l - r),
                Op::MulI => binary!(as_int, Value::Int, Value::Int(0), |l, r| l.wrapping_mul(r)),
                Op::MulF => binary!(as_float, Value::Float, Value::Float(0.0), |l, r| l * r),
                Op::MulD => binary!(as_double, Value::Double, Value::Double(0.0), |l, r| l * r),
                Op::DivI => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    if ln || rn || rv.as_int() == 0 {
                        self.push(Value::Int(0), true);
                    } else {
                        self.push(Value::Int(lv.as_int().wrapping_div(rv.as_int())), false);
                    }
                }
                Op::DivF => binary!(as_float, Value::Float, Value::Float(0.0), |l, r| l / r),
                Op::DivD => binary!(as_double, Value::Double, Value::Double(0.0), |l, r| l / r),
                Op::ModI => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    if ln || rn || rv.as_int() == 0 {
                        self.push(Value::Int(0), true);
                    } else {
                        self.push(Value::Int(lv.as_int().wrapping_rem(rv.as_int())), false);
                    }
                }
                Op::AndI => binary!(as_int, Value::Int, Value::Int(0), |l, r| l & r),
                Op::CatS => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    if rn {
                        self.push(lv, ln);
                    } else if ln {
                        self.push(rv, rn);
                    } else {
                        let mut s = String::with_capacity(lv.as_str().len() + rv.as_str().len());
                        s.push_str(lv.as_str());
                        s.push_str(rv.as_str());
                        self.push(Value::Str(Rc::from(s.as_str())), false);
                    }
                }

                /*----- Logic --------------------------------------------*/
                Op::NotB => {
                    let (v, n) = self.pop();
                    if n {
                        self.push(Value::Bool(false), true);
                    } else {
                        self.push(Value::Bool(!v.as_bool()), false);
                    }
                }
                // Three-valued logic after Kleene: a NULL operand only
                // dominates when the other side cannot decide the result.
                Op::AndB => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    let l = !ln && lv.as_bool();
                    let r = !rn && rv.as_bool();
                    let null = (l || ln) && (r || rn) && (ln || rn);
                    self.push(Value::Bool(l && r), null);
                }
                Op::OrB => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    let l = !ln && lv.as_bool();
                    let r = !rn && rv.as_bool();
                    let null = (!l || ln) && (!r || rn) && (ln || rn);
                    self.push(Value::Bool(l || r), null);
                }

                /*----- Comparison ---------------------------------------*/
                Op::EqI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l == r),
                Op::EqF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l == r),
                Op::EqD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l == r),
                Op::EqB => binary!(as_bool, Value::Bool, Value::Bool(false), |l, r| l == r),
                Op::EqS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l == r),
                Op::NeI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l != r),
                Op::NeF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l != r),
                Op::NeD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l != r),
                Op::NeB => binary!(as_bool, Value::Bool, Value::Bool(false), |l, r| l != r),
                Op::NeS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l != r),
                Op::LtI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l < r),
                Op::LtF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l < r),
                Op::LtD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l < r),
                Op::LtS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l < r),
                Op::GtI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l > r),
                Op::GtF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l > r),
                Op::GtD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l > r),
                Op::GtS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l > r),
                Op::LeI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l <= r),
                Op::LeF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l <= r),
                Op::LeD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l <= r),
                Op::LeS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l <= r),
                Op::GeI => binary!(as_int, Value::Bool, Value::Bool(false), |l, r| l >= r),
                Op::GeF => binary!(as_float, Value::Bool, Value::Bool(false), |l, r| l >= r),
                Op::GeD => binary!(as_double, Value::Bool, Value::Bool(false), |l, r| l >= r),
                Op::GeS => binary!(as_str, Value::Bool, Value::Bool(false), |l, r| l >= r),
                Op::CmpI => cmp3!(as_int),
                Op::CmpF => cmp3!(as_float),
                Op::CmpD => cmp3!(as_double),
                Op::CmpB => cmp3!(as_bool),
                Op::CmpS => {
                    let (rv, rn) = self.pop();
                    let (lv, ln) = self.pop();
                    if ln || rn {
                        self.push(Value::Int(0), true);
                    } else {
                        let c = match lv.as_str().cmp(rv.as_str()) {
                            std::cmp::Ordering::Less => -1,
                            std::cmp::Ordering::Equal => 0,
                            std::cmp::Ordering::Greater => 1,
                        };
                        self.push(Value::Int(c), false);
                    }
                }

                /*----- Intrinsics ---------------------------------------*/
                Op::IsNull => {
                    let (_, n) = self.pop();
                    self.push(Value::Bool(n), false);
                }
                Op::CastIF => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(v.as_float() as i64), n);
                }
                Op::CastID => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(v.as_double() as i64), n);
                }
                Op::CastIB => {
                    let (v, n) = self.pop();
                    self.push(Value::Int(i64::from(v.as_bool())), n);
                }
                Op::CastFI => {
                    let (v, n) = self.pop();
                    self.push(Value::Float(v.as_int() as f32), n);
                }
                Op::CastFD => {
                    let (v, n) = self.pop();
                    self.push(Value::Float(v.as_double() as f32), n);
                }
                Op::CastDI => {
                    let (v, n) = self.pop();
                    self.push(Value::Double(v.as_int() as f64), n);
                }
                Op::CastDF => {
                    let (v, n) = self.pop();
                    self.push(Value::Double(f64::from(v.as_float())), n);
                }
                Op::Like => {
                    let (pv, pn) = self.pop();
                    let (sv, sn) = self.pop();
                    if pn || sn {
                        self.push(Value::Bool(false), true);
                    } else {
                        let res = like(sv.as_str(), pv.as_str())?;
                        self.push(Value::Bool(res), false);
                    }
                }
            }
        }
        Ok(())
    }
}

fn mem_default(ty: MemTy) -> Value {
    match ty {
        MemTy::Bool => Value::Bool(false),
        MemTy::F32 => Value::Float(0.0),
        MemTy::F64 => Value::Double(0.0),
        MemTy::Char(_) => Value::Str(Rc::from("")),
        _ => Value::Int(0),
    }
}

fn load_mem(ty: MemTy, data: &[u8], bit_off: u64) -> Value {
    let byte = (bit_off / 8) as usize;
    match ty {
        MemTy::Bool => Value::Bool(get_bit(data, bit_off)),
        MemTy::I8 => Value::Int(i64::from(data[byte] as i8)),
        MemTy::I16 => {
            let mut buf = [0u8; 2];
            buf.copy_from_slice(&data[byte..byte + 2]);
            Value::Int(i64::from(i16::from_le_bytes(buf)))
        }
        MemTy::I32 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&data[byte..byte + 4]);
            Value::Int(i64::from(i32::from_le_bytes(buf)))
        }
        MemTy::I64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[byte..byte + 8]);
            Value::Int(i64::from_le_bytes(buf))
        }
        MemTy::F32 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&data[byte..byte + 4]);
            Value::Float(f32::from_le_bytes(buf))
        }
        MemTy::F64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[byte..byte + 8]);
            Value::Double(f64::from_le_bytes(buf))
        }
        MemTy::Char(len) => {
            let bytes = &data[byte..byte + len];
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
            Value::Str(Rc::from(
                std::str::from_utf8(&bytes[..end]).unwrap_or(""),
            ))
        }
    }
}

fn store_mem(ty: MemTy, data: &mut [u8], bit_off: u64, value: &Value) {
    let byte = (bit_off / 8) as usize;
    match ty {
        MemTy::Bool => set_bit(data, bit_off, value.as_bool()),
        MemTy::I8 => data[byte] = value.as_int() as u8,
        MemTy::I16 => data[byte..byte + 2].copy_from_slice(&(value.as_int() as i16).to_le_bytes()),
        MemTy::I32 => data[byte..byte + 4].copy_from_slice(&(value.as_int() as i32).to_le_bytes()),
        MemTy::I64 => data[byte..byte + 8].copy_from_slice(&value.as_int().to_le_bytes()),
        MemTy::F32 => data[byte..byte + 4].copy_from_slice(&value.as_float().to_le_bytes()),
        MemTy::F64 => data[byte..byte + 8].copy_from_slice(&value.as_double().to_le_bytes()),
        MemTy::Char(len) => {
            let s = value.as_str().as_bytes();
            let n = s.len().min(len);
            data[byte..byte + n].copy_from_slice(&s[..n]);
            for b in &mut data[byte + n..byte + len] {
                *b = 0;
            }
        }
    }
}

/*=========================================================================
 * Expression and CNF compilation
 *=======================================================================*/

/// The value family an opcode suffix selects on.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fam {
    B,
    I,
    F,
    D,
    S,
}

fn fam(ty: &Type) -> Result<Fam, ExecError> {
    if ty.is_boolean() {
        return Ok(Fam::B);
    }
    if ty.is_character_sequence() {
        return Ok(Fam::S);
    }
    if ty.is_integral() || ty.is_decimal() {
        return Ok(Fam::I);
    }
    if ty.is_float() {
        return Ok(Fam::F);
    }
    if ty.is_double() {
        return Ok(Fam::D);
    }
    // Date and datetime compare as integers.
    if matches!(ty, Type::Date { .. } | Type::DateTime { .. }) {
        return Ok(Fam::I);
    }
    Err(ExecError::IllTyped(ty.to_string()))
}

/// Compiles expressions against an input schema into opcode sequences.
pub struct ExprCompiler<'a> {
    machine: &'a mut StackMachine,
    schema: &'a Schema,
    catalog: &'a Catalog,
    tuple_id: usize,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(
        machine: &'a mut StackMachine,
        schema: &'a Schema,
        catalog: &'a Catalog,
        tuple_id: usize,
    ) -> Self {
        ExprCompiler {
            machine,
            schema,
            catalog,
            tuple_id,
        }
    }

    /// Compiles `expr`; at runtime its value ends up on top of the stack.
    pub fn compile(&mut self, expr: &Expr) -> Result<(), ExecError> {
        match expr {
            Expr::Designator(d) => {
                let id = Ident::new(d.table.clone(), d.attr.clone());
                let idx = self
                    .schema
                    .find(&id)?
                    .ok_or_else(|| ExecError::UnknownIdentifier(id.to_string()))?;
                self.machine.emit(Op::LdTup {
                    tuple: self.tuple_id,
                    index: idx,
                });
                Ok(())
            }
            Expr::Constant { value, .. } => {
                match value {
                    Literal::Null => self.machine.emit(Op::PushNull),
                    Literal::Bool(b) => {
                        self.machine.add_and_emit_load(Value::Bool(*b));
                    }
                    Literal::Int(i) => {
                        self.machine.add_and_emit_load(Value::Int(*i));
                    }
                    Literal::Float(f) => {
                        self.machine.add_and_emit_load(Value::Double(*f));
                    }
                    Literal::Str(s) => {
                        self.machine.add_and_emit_load(Value::Str(Rc::from(s.as_str())));
                    }
                }
                Ok(())
            }
            Expr::FnApp { fnid, args, .. } => self.compile_fn(expr, *fnid, args),
            Expr::Unary { op, expr: inner, .. } => {
                self.compile(inner)?;
                let ty = inner.ty();
                match op {
                    UnOp::Plus => {}
                    UnOp::Minus => match fam(ty)? {
                        Fam::I => self.machine.emit(Op::MinusI),
                        Fam::F => self.machine.emit(Op::MinusF),
                        Fam::D => self.machine.emit(Op::MinusD),
                        _ => return Err(ExecError::IllTyped(ty.to_string())),
                    },
                    UnOp::BitNot => {
                        if ty.is_integral() {
                            self.machine.emit(Op::NegI);
                        } else if ty.is_boolean() {
                            self.machine.emit(Op::NotB);
                        } else {
                            return Err(ExecError::IllTyped(ty.to_string()));
                        }
                    }
                    UnOp::Not => self.machine.emit(Op::NotB),
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs, ty } => self.compile_binary(*op, lhs, rhs, ty),
            Expr::Query { .. } => Err(ExecError::Unsupported(
                "dependent subquery evaluation".into(),
            )),
        }
    }

    fn compile_fn(&mut self, whole: &Expr, fnid: Fnid, args: &[Rc<Expr>]) -> Result<(), ExecError> {
        match fnid {
            Fnid::Udf => Err(ExecError::Unsupported("user-defined functions".into())),
            Fnid::IsNull => {
                self.compile(&args[0])?;
                self.machine.emit(Op::IsNull);
                Ok(())
            }
            Fnid::Int => {
                self.compile(&args[0])?;
                let ty = args[0].ty();
                if ty.is_float() {
                    self.machine.emit(Op::CastIF);
                } else if ty.is_double() {
                    self.machine.emit(Op::CastID);
                } else if ty.is_boolean() {
                    self.machine.emit(Op::CastIB);
                } else if ty.is_decimal() {
                    let factor = 10i64.pow(ty.scale());
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::DivI);
                }
                Ok(())
            }
            Fnid::Count | Fnid::Sum | Fnid::Min | Fnid::Max | Fnid::Avg => {
                // Aggregates are computed by the grouping operator; above it
                // they are named slots of the input schema.
                let name = self.catalog.intern(&whole.to_string());
                let id = Ident::bare(name);
                let idx = self
                    .schema
                    .find(&id)?
                    .ok_or_else(|| ExecError::UnknownIdentifier(id.to_string()))?;
                self.machine.emit(Op::LdTup {
                    tuple: self.tuple_id,
                    index: idx,
                });
                Ok(())
            }
        }
    }

    /// Emits a conversion of the top of stack from `from` to `to`.
    fn emit_cast(&mut self, from: &Type, to: &Type) -> Result<(), ExecError> {
        let f = fam(from)?;
        let t = fam(to)?;
        if f == t {
            return Ok(());
        }
        let op = match (t, f) {
            (Fam::I, Fam::F) => Op::CastIF,
            (Fam::I, Fam::D) => Op::CastID,
            (Fam::I, Fam::B) => Op::CastIB,
            (Fam::F, Fam::I) => Op::CastFI,
            (Fam::F, Fam::D) => Op::CastFD,
            (Fam::D, Fam::I) => Op::CastDI,
            (Fam::D, Fam::F) => Op::CastDF,
            _ => return Err(ExecError::IllTyped(format!("{from} -> {to}"))),
        };
        self.machine.emit(op);
        Ok(())
    }

    /// Emits a rescale of the top of stack from the scale of `from` to the
    /// scale of `to`.  The factors are powers of ten.
    fn emit_scale(&mut self, from: &Type, to: &Type) -> Result<(), ExecError> {
        let (fs, ts) = (from.scale(), to.scale());
        if fs == ts {
            return Ok(());
        }
        if fs < ts {
            let factor = 10i64.pow(ts - fs);
            match fam(from)? {
                Fam::F => {
                    self.machine.add_and_emit_load(Value::Float(factor as f32));
                    self.machine.emit(Op::MulF);
                }
                Fam::D => {
                    self.machine.add_and_emit_load(Value::Double(factor as f64));
                    self.machine.emit(Op::MulD);
                }
                Fam::I => {
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::MulI);
                }
                _ => return Err(ExecError::IllTyped(from.to_string())),
            }
        } else {
            let factor = 10i64.pow(fs - ts);
            match fam(from)? {
                Fam::F => {
                    self.machine
                        .add_and_emit_load(Value::Float(1.0 / factor as f32));
                    self.machine.emit(Op::MulF);
                }
                Fam::D => {
                    self.machine
                        .add_and_emit_load(Value::Double(1.0 / factor as f64));
                    self.machine.emit(Op::MulD);
                }
                Fam::I => {
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::DivI);
                }
                _ => return Err(ExecError::IllTyped(from.to_string())),
            }
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        op: BinOp,
        lhs: &Rc<Expr>,
        rhs: &Rc<Expr>,
        ty: &Type,
    ) -> Result<(), ExecError> {
        match op {
            BinOp::Add | BinOp::Sub => {
                self.compile(lhs)?;
                self.emit_scale(lhs.ty(), ty)?;
                self.emit_cast(lhs.ty(), ty)?;
                self.compile(rhs)?;
                self.emit_scale(rhs.ty(), ty)?;
                self.emit_cast(rhs.ty(), ty)?;
                let ops = match fam(ty)? {
                    Fam::I => (Op::AddI, Op::SubI),
                    Fam::F => (Op::AddF, Op::SubF),
                    Fam::D => (Op::AddD, Op::SubD),
                    _ => return Err(ExecError::IllTyped(ty.to_string())),
                };
                self.machine
                    .emit(if op == BinOp::Add { ops.0 } else { ops.1 });
                Ok(())
            }
            BinOp::Mul => {
                // Multiplying two scaled integers yields the sum of the
                // scales; scale back down to the result scale afterwards.
                let mut the_scale = 0i64;
                self.compile(lhs)?;
                if lhs.ty().is_floating_point() {
                    self.emit_scale(lhs.ty(), ty)?;
                    the_scale += i64::from(ty.scale());
                } else {
                    the_scale += i64::from(lhs.ty().scale());
                }
                self.emit_cast(lhs.ty(), ty)?;

                self.compile(rhs)?;
                if rhs.ty().is_floating_point() {
                    self.emit_scale(rhs.ty(), ty)?;
                    the_scale += i64::from(ty.scale());
                } else {
                    the_scale += i64::from(rhs.ty().scale());
                }
                self.emit_cast(rhs.ty(), ty)?;

                match fam(ty)? {
                    Fam::I => self.machine.emit(Op::MulI),
                    Fam::F => self.machine.emit(Op::MulF),
                    Fam::D => self.machine.emit(Op::MulD),
                    _ => return Err(ExecError::IllTyped(ty.to_string())),
                }

                the_scale -= i64::from(ty.scale());
                debug_assert!(the_scale >= 0);
                if the_scale != 0 && fam(ty)? == Fam::I {
                    let factor = 10i64.pow(the_scale as u32);
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::DivI);
                }
                Ok(())
            }
            BinOp::Div => {
                // The effective scale of an integer division is
                // `scale(lhs) - scale(rhs)`; scale the dividend up front
                // when that undershoots the result scale, and the quotient
                // down when it overshoots.
                let mut the_scale = 0i64;
                self.compile(lhs)?;
                if lhs.ty().is_floating_point() {
                    self.emit_scale(lhs.ty(), ty)?;
                    the_scale += i64::from(ty.scale());
                } else {
                    the_scale += i64::from(lhs.ty().scale());
                }
                self.emit_cast(lhs.ty(), ty)?;

                if rhs.ty().is_floating_point() {
                    the_scale -= i64::from(ty.scale());
                } else {
                    the_scale -= i64::from(rhs.ty().scale());
                }
                if the_scale < i64::from(ty.scale()) && fam(ty)? == Fam::I {
                    let factor = 10i64.pow((i64::from(ty.scale()) - the_scale) as u32);
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::MulI);
                    the_scale = i64::from(ty.scale());
                }

                self.compile(rhs)?;
                if rhs.ty().is_floating_point() {
                    self.emit_scale(rhs.ty(), ty)?;
                }
                self.emit_cast(rhs.ty(), ty)?;

                match fam(ty)? {
                    Fam::I => self.machine.emit(Op::DivI),
                    Fam::F => self.machine.emit(Op::DivF),
                    Fam::D => self.machine.emit(Op::DivD),
                    _ => return Err(ExecError::IllTyped(ty.to_string())),
                }

                if the_scale > i64::from(ty.scale()) {
                    let factor = 10i64.pow((the_scale - i64::from(ty.scale())) as u32);
                    self.machine.add_and_emit_load(Value::Int(factor));
                    self.machine.emit(Op::DivI);
                }
                Ok(())
            }
            BinOp::Mod => {
                self.compile(lhs)?;
                self.compile(rhs)?;
                self.machine.emit(Op::ModI);
                Ok(())
            }
            BinOp::Cat => {
                self.compile(lhs)?;
                self.compile(rhs)?;
                self.machine.emit(Op::CatS);
                Ok(())
            }
            BinOp::Like => {
                self.compile(lhs)?;
                self.compile(rhs)?;
                self.machine.emit(Op::Like);
                Ok(())
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                let family = if lhs.ty().is_numeric() {
                    let joined = arithmetic_join(lhs.ty(), rhs.ty());
                    self.compile(lhs)?;
                    self.emit_scale(lhs.ty(), &joined)?;
                    self.emit_cast(lhs.ty(), &joined)?;
                    self.compile(rhs)?;
                    self.emit_scale(rhs.ty(), &joined)?;
                    self.emit_cast(rhs.ty(), &joined)?;
                    fam(&joined)?
                } else {
                    self.compile(lhs)?;
                    self.compile(rhs)?;
                    fam(lhs.ty())?
                };
                let opcode = match (op, family) {
                    (BinOp::Eq, Fam::I) => Op::EqI,
                    (BinOp::Eq, Fam::F) => Op::EqF,
                    (BinOp::Eq, Fam::D) => Op::EqD,
                    (BinOp::Eq, Fam::B) => Op::EqB,
                    (BinOp::Eq, Fam::S) => Op::EqS,
                    (BinOp::Ne, Fam::I) => Op::NeI,
                    (BinOp::Ne, Fam::F) => Op::NeF,
                    (BinOp::Ne, Fam::D) => Op::NeD,
                    (BinOp::Ne, Fam::B) => Op::NeB,
                    (BinOp::Ne, Fam::S) => Op::NeS,
                    (BinOp::Lt, Fam::I) => Op::LtI,
                    (BinOp::Lt, Fam::F) => Op::LtF,
                    (BinOp::Lt, Fam::D) => Op::LtD,
                    (BinOp::Lt, Fam::S) => Op::LtS,
                    (BinOp::Gt, Fam::I) => Op::GtI,
                    (BinOp::Gt, Fam::F) => Op::GtF,
                    (BinOp::Gt, Fam::D) => Op::GtD,
                    (BinOp::Gt, Fam::S) => Op::GtS,
                    (BinOp::Le, Fam::I) => Op::LeI,
                    (BinOp::Le, Fam::F) => Op::LeF,
                    (BinOp::Le, Fam::D) => Op::LeD,
                    (BinOp::Le, Fam::S) => Op::LeS,
                    (BinOp::Ge, Fam::I) => Op::GeI,
                    (BinOp::Ge, Fam::F) => Op::GeF,
                    (BinOp::Ge, Fam::D) => Op::GeD,
                    (BinOp::Ge, Fam::S) => Op::GeS,
                    _ => return Err(ExecError::IllTyped(lhs.ty().to_string())),
                };
                self.machine.emit(opcode);
                Ok(())
            }
            BinOp::And => {
                self.compile(lhs)?;
                self.compile(rhs)?;
                self.machine.emit(Op::AndB);
                Ok(())
            }
            BinOp::Or => {
                self.compile(lhs)?;
                self.compile(rhs)?;
                self.machine.emit(Op::OrB);
                Ok(())
            }
        }
    }
}

/// Compiles a whole CNF: clauses fold with `AndB`, literals within a clause
/// with `OrB`, and a false clause short-circuits the rest.  The empty
/// conjunction is TRUE (a cross-product join has no predicate).
pub fn compile_cnf(
    machine: &mut StackMachine,
    schema: &Schema,
    catalog: &Catalog,
    tuple_id: usize,
    cnf: &Cnf,
) -> Result<(), ExecError> {
    if cnf.is_empty() {
        machine.add_and_emit_load(Value::Bool(true));
        return Ok(());
    }
    let num_clauses = cnf.0.len();
    for (ci, clause) in cnf.0.iter().enumerate() {
        for (pi, predicate) in clause.0.iter().enumerate() {
            let mut compiler = ExprCompiler::new(machine, schema, catalog, tuple_id);
            compiler.compile(&predicate.expr)?;
            if predicate.negated {
                machine.emit(Op::NotB);
            }
            if pi != 0 {
                machine.emit(Op::OrB);
            }
        }
        if ci + 1 != num_clauses {
            machine.emit(Op::StopFalse);
        }
        if ci != 0 {
            machine.emit(Op::AndB);
        }
    }
    Ok(())
}

/*=========================================================================
 * Data layout compilation
 *=======================================================================*/

/// A compiled sequential loader: one program that materializes the current
/// row into tuple 0 and then advances its offsets to the next row.
///
/// The compiler walks the sibling leaves of the store's layout, shares one
/// offset slot per `(region, stride)` group, keeps per-leaf byte and bit
/// offsets as constants relative to the shared slot, and emits the
/// stride-jump advance for every ancestor inode (with a bitmask instead of a
/// division when the block size is a power of two).
pub fn compile_loader(
    store: &dyn Store,
    layout_schema: &Schema,
    scan_schema: &Schema,
) -> Result<StackMachine, ExecError> {
    let layout = store.linearization();
    let mut machine = StackMachine::new();

    // region id -> machine region index
    let mut region_slots: Vec<Option<usize>> = vec![None; layout.num_regions()];
    let mut region_index = |machine: &mut StackMachine, region: usize| {
        if let Some(idx) = region_slots[region] {
            return idx;
        }
        // Any leaf of the region will do to fetch its backing bytes.
        let leaf = (0..=layout.num_attrs())
            .find(|&l| layout.region_of(l) == region)
            .expect("region backs at least one leaf");
        let idx = machine.add_region(store.region(leaf));
        region_slots[region] = Some(idx);
        idx
    };

    // (region, leaf stride) -> shared base offset context slot
    let mut groups: Vec<(usize, u64, usize)> = Vec::new(); // (region, leaf stride, slot)
    let mut base_slot = |machine: &mut StackMachine, region: usize, stride: u64| {
        if let Some((_, _, slot)) = groups.iter().find(|(r, s, _)| *r == region && *s == stride) {
            return *slot;
        }
        let slot = machine.add_constant(Value::Int(0));
        groups.push((region, stride, slot));
        slot
    };

    let root = layout.root();
    let null_leaf = layout.null_bitmap_index();
    let null_region = layout.region_of(null_leaf);
    let null_stride = layout.leaf(null_leaf).stride_in_bits;
    let null_base = base_slot(&mut machine, null_region, null_stride);
    let null_leaf_offset = layout.leaf(null_leaf).offset_in_bits;
    let null_region_idx = region_index(&mut machine, null_region);

    /*----- Per-tuple load phase. --------------------------------------*/
    for (out_idx, entry) in scan_schema.iter().enumerate() {
        // Map the scan entry onto the layout schema by (bare) name.
        let attr = layout_schema
            .find(&Ident::bare(entry.id.name.clone()))?
            .ok_or_else(|| ExecError::UnknownIdentifier(entry.id.to_string()))?;
        let mem_ty = MemTy::of(&entry.ty)?;
        let region = layout.region_of(attr);
        let slot = base_slot(&mut machine, region, layout.leaf(attr).stride_in_bits);
        let leaf_offset = layout.leaf(attr).offset_in_bits;
        let region_idx = region_index(&mut machine, region);

        // null bit offset = null base + null leaf offset + attr index
        machine.emit(Op::LdCtx(null_base));
        machine.add_and_emit_load(Value::Int((null_leaf_offset + attr as u64) as i64));
        machine.emit(Op::AddI);
        // value bit offset = group base + leaf offset
        machine.emit(Op::LdCtx(slot));
        machine.add_and_emit_load(Value::Int(leaf_offset as i64));
        machine.emit(Op::AddI);
        machine.emit(Op::LdMem {
            region: region_idx,
            null_region: null_region_idx,
            ty: mem_ty,
        });
        machine.emit(Op::StTup {
            tuple: 0,
            index: out_idx,
        });
        machine.emit(Op::Pop);
    }

    /*----- Stride-jump advance phase. ---------------------------------
     * One tuple per block folds into a constant per-row advance of the
     * block stride; an unbounded block advances by the leaf stride; a
     * finite block advances by the leaf stride plus a conditional jump of
     * `stride - num_tuples * leaf_stride` at each block boundary. */
    let finite_blocks = root.num_tuples > 1 && root.num_tuples != u64::MAX;
    let row_slot = if finite_blocks {
        Some(machine.add_constant(Value::Int(0)))
    } else {
        None
    };
    for (_, leaf_stride, slot) in &groups {
        let per_row = if root.num_tuples == 1 {
            root.stride_in_bits
        } else {
            *leaf_stride
        };
        machine.emit(Op::LdCtx(*slot));
        machine.add_and_emit_load(Value::Int(per_row as i64));
        machine.emit(Op::AddI);
        machine.emit(Op::UpdCtx(*slot));
        machine.emit(Op::Pop);
    }
    if let Some(row_slot) = row_slot {
        machine.emit(Op::LdCtx(row_slot));
        machine.emit(Op::Inc);
        machine.emit(Op::UpdCtx(row_slot));
        machine.emit(Op::Pop);
        for (_, leaf_stride, slot) in &groups {
            let jump = root.stride_in_bits as i64 - (root.num_tuples * leaf_stride) as i64;
            machine.emit(Op::LdCtx(row_slot));
            if root.num_tuples.is_power_of_two() {
                machine.add_and_emit_load(Value::Int(root.num_tuples as i64 - 1));
                machine.emit(Op::AndI);
            } else {
                machine.add_and_emit_load(Value::Int(root.num_tuples as i64));
                machine.emit(Op::ModI);
            }
            machine.emit(Op::SkipNZ(5));
            machine.emit(Op::LdCtx(*slot));
            machine.add_and_emit_load(Value::Int(jump));
            machine.emit(Op::AddI);
            machine.emit(Op::UpdCtx(*slot));
            machine.emit(Op::Pop);
        }
    }

    Ok(machine)
}
