//! The push-based pipeline interpreter.
//!
//! Execution flattens the operator tree, computes transient parent links,
//! compiles per-operator stack machines into a side table of states, and
//! then drives each pipeline from its scans: every produced tuple is pushed
//! into the parent's `consume`.  `Limit` terminates its producer tree early
//! by returning [`Outcome::Stop`] down the consume chain.

pub mod value;
pub mod vm;

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use tracing::debug;

use crate::ast::{BinOp, Expr, Fnid};
use crate::catalog::{Catalog, Schema};
use crate::error::ExecError;
use crate::ops::{GroupingAlgo, JoinAlgo, OperatorKind, OperatorNode};
use value::{Tuple, Value};
use vm::{compile_cnf, compile_loader, ExprCompiler, Op, StackMachine};

/// Flow control threaded through the consumer calls; replaces the
/// stack-unwinding exception of limit operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Stop,
}

/// Where result tuples go.
pub enum Sink<'a> {
    Callback(&'a mut dyn FnMut(&Schema, &Tuple)),
    Print(&'a mut dyn Write),
    /// Drops tuples; only the row count is reported.
    NoOp,
}

/// Runs `root` against `catalog`, sending output tuples into `sink`.
/// Returns the number of tuples the sink received.
pub fn execute(catalog: &Catalog, root: &OperatorNode, sink: Sink) -> Result<u64, ExecError> {
    let mut executor = Executor::new(catalog, root, sink)?;
    executor.run()
}

/*----- Aggregate accumulators ---------------------------------------------*/

struct AggCell {
    value: Value,
    null: bool,
    /// Running sum and count for `AVG`, finalized by division.
    avg: (f64, u64),
}

struct Group {
    key: Tuple,
    cells: Vec<AggCell>,
}

/*----- Per-operator execution state ---------------------------------------*/

#[derive(Default)]
enum OpState {
    #[default]
    None,
    Scan {
        loader: StackMachine,
        rows: u64,
    },
    Filter {
        machine: StackMachine,
    },
    Projection {
        machine: StackMachine,
    },
    NestedLoops {
        predicate: StackMachine,
        buffers: Vec<Vec<Tuple>>,
        /// Tuple offset of each child within the combined tuple.
        offsets: Vec<usize>,
        active_child: usize,
    },
    HashJoin {
        build_index: usize,
        probe_index: usize,
        left_len: usize,
        table: HashMap<Value, Vec<Tuple>>,
        probing: bool,
    },
    Grouping {
        keys: StackMachine,
        num_keys: usize,
        args: Vec<Option<StackMachine>>,
        groups: Vec<Group>,
        index: HashMap<Tuple, usize>,
        /// Ordered grouping keeps only the current run.
        ordered: bool,
    },
    Sorting {
        buffer: Vec<Tuple>,
    },
    Limit {
        seen: u64,
    },
    Sink,
}

struct Executor<'a, 's> {
    catalog: &'a Catalog,
    nodes: Vec<&'a OperatorNode>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    states: Vec<OpState>,
    sink: Sink<'s>,
    emitted: u64,
}

impl<'a, 's> Executor<'a, 's> {
    fn new(catalog: &'a Catalog, root: &'a OperatorNode, sink: Sink<'s>) -> Result<Self, ExecError> {
        let mut executor = Executor {
            catalog,
            nodes: Vec::new(),
            parent: Vec::new(),
            children: Vec::new(),
            states: Vec::new(),
            sink,
            emitted: 0,
        };
        executor.flatten(root, None);
        for id in 0..executor.nodes.len() {
            let state = executor.setup(id)?;
            executor.states[id] = state;
        }
        Ok(executor)
    }

    /// Pre-order flattening; computes the transient parent links.
    fn flatten(&mut self, node: &'a OperatorNode, parent: Option<usize>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.parent.push(parent);
        self.children.push(Vec::new());
        self.states.push(OpState::None);
        for child in node.children() {
            let c = self.flatten(child, Some(id));
            self.children[id].push(c);
        }
        id
    }

    fn child_schema(&self, id: usize, i: usize) -> &'a Schema {
        self.nodes[self.children[id][i]].schema()
    }

    /// Compiles the per-operator state.
    fn setup(&self, id: usize) -> Result<OpState, ExecError> {
        let node = self.nodes[id];
        Ok(match &node.kind {
            OperatorKind::Scan { table, .. } => {
                let db = self.catalog.get_database_in_use()?;
                let table = db.get_table(table)?;
                let store = table.store();
                let store = store.borrow();
                let layout_schema = table.schema();
                let loader = compile_loader(&*store, &layout_schema, node.schema())?;
                let rows = store.num_rows();
                OpState::Scan { loader, rows }
            }
            OperatorKind::Filter { filter } => {
                let mut machine = StackMachine::new();
                compile_cnf(&mut machine, node.schema(), self.catalog, 0, filter)?;
                OpState::Filter { machine }
            }
            OperatorKind::Projection { projections } => {
                let empty = Schema::new();
                let input = if self.children[id].is_empty() {
                    &empty
                } else {
                    self.child_schema(id, 0)
                };
                let mut machine = StackMachine::new();
                for (i, (expr, _)) in projections.iter().enumerate() {
                    let mut compiler = ExprCompiler::new(&mut machine, input, self.catalog, 1);
                    compiler.compile(expr)?;
                    machine.emit(Op::StTup { tuple: 0, index: i });
                    machine.emit(Op::Pop);
                }
                OpState::Projection { machine }
            }
            OperatorKind::Join { predicate, algo } => match algo {
                JoinAlgo::NestedLoops => {
                    let mut machine = StackMachine::new();
                    compile_cnf(&mut machine, node.schema(), self.catalog, 0, predicate)?;
                    let num_children = self.children[id].len();
                    let mut offsets = Vec::with_capacity(num_children);
                    let mut off = 0;
                    for i in 0..num_children {
                        offsets.push(off);
                        off += self.child_schema(id, i).num_entries();
                    }
                    OpState::NestedLoops {
                        predicate: machine,
                        buffers: vec![Vec::new(); num_children.saturating_sub(1)],
                        offsets,
                        active_child: 0,
                    }
                }
                JoinAlgo::SimpleHashJoin => {
                    let (build_index, probe_index) = self.hash_join_keys(id, predicate)?;
                    OpState::HashJoin {
                        build_index,
                        probe_index,
                        left_len: self.child_schema(id, 0).num_entries(),
                        table: HashMap::new(),
                        probing: false,
                    }
                }
            },
            OperatorKind::Grouping {
                group_by,
                aggregates,
                algo,
            } => self.setup_grouping(id, group_by, aggregates, *algo == GroupingAlgo::Ordered)?,
            OperatorKind::Aggregation { aggregates } => {
                self.setup_grouping(id, &[], aggregates, false)?
            }
            OperatorKind::Sorting { .. } => OpState::Sorting { buffer: Vec::new() },
            OperatorKind::Limit { .. } => OpState::Limit { seen: 0 },
            OperatorKind::Callback | OperatorKind::Print | OperatorKind::NoOp => OpState::Sink,
        })
    }

    fn setup_grouping(
        &self,
        id: usize,
        group_by: &[Rc<Expr>],
        aggregates: &[Rc<Expr>],
        ordered: bool,
    ) -> Result<OpState, ExecError> {
        let input = self.child_schema(id, 0);
        let mut keys = StackMachine::new();
        for (i, key) in group_by.iter().enumerate() {
            let mut compiler = ExprCompiler::new(&mut keys, input, self.catalog, 1);
            compiler.compile(key)?;
            keys.emit(Op::StTup { tuple: 0, index: i });
            keys.emit(Op::Pop);
        }
        let mut args = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let Expr::FnApp { args: fn_args, .. } = agg.as_ref() else {
                return Err(ExecError::IllTyped(agg.to_string()));
            };
            match fn_args.first() {
                Some(arg) => {
                    let mut machine = StackMachine::new();
                    let mut compiler = ExprCompiler::new(&mut machine, input, self.catalog, 0);
                    compiler.compile(arg)?;
                    args.push(Some(machine));
                }
                None => args.push(None),
            }
        }
        Ok(OpState::Grouping {
            keys,
            num_keys: group_by.len(),
            args,
            groups: Vec::new(),
            index: HashMap::new(),
            ordered,
        })
    }

    /// Extracts the build and probe key positions of a simple hash join from
    /// its single equality literal.
    fn hash_join_keys(&self, id: usize, predicate: &crate::ast::cnf::Cnf) -> Result<(usize, usize), ExecError> {
        let clause = predicate
            .0
            .first()
            .ok_or_else(|| ExecError::IllTyped("hash join without predicate".into()))?;
        let Expr::Binary {
            op: BinOp::Eq,
            lhs,
            rhs,
            ..
        } = clause.0[0].expr.as_ref()
        else {
            return Err(ExecError::IllTyped("hash join predicate is not an equality".into()));
        };
        let left_schema = self.child_schema(id, 0);
        let right_schema = self.child_schema(id, 1);
        let pos = |schema: &Schema, e: &Rc<Expr>| -> Result<Option<usize>, ExecError> {
            let Some(d) = e.as_designator() else {
                return Ok(None);
            };
            let id = crate::catalog::Ident::new(d.table.clone(), d.attr.clone());
            Ok(schema.find(&id)?)
        };
        if let (Some(b), Some(p)) = (pos(left_schema, lhs)?, pos(right_schema, rhs)?) {
            return Ok((b, p));
        }
        if let (Some(b), Some(p)) = (pos(left_schema, rhs)?, pos(right_schema, lhs)?) {
            return Ok((b, p));
        }
        Err(ExecError::IllTyped(
            "hash join keys do not match the child schemas".into(),
        ))
    }

    fn run(&mut self) -> Result<u64, ExecError> {
        debug!(operators = self.nodes.len(), "pipeline setup complete");
        self.drive(0)?;
        if let Sink::Print(w) = &mut self.sink {
            let _ = w.flush();
        }
        debug!(rows = self.emitted, "execution finished");
        Ok(self.emitted)
    }

    /// Drives the producer below `id`; blocking operators run their child
    /// pipeline to completion and then emit their own.
    fn drive(&mut self, id: usize) -> Result<Outcome, ExecError> {
        let node = self.nodes[id];
        match &node.kind {
            OperatorKind::Scan { .. } => self.drive_scan(id),
            OperatorKind::Filter { .. } => self.drive_child(id, 0),
            OperatorKind::Join { algo, .. } => match algo {
                JoinAlgo::NestedLoops => {
                    for i in 0..self.children[id].len() {
                        if let OpState::NestedLoops { active_child, .. } = &mut self.states[id] {
                            *active_child = i;
                        }
                        if self.drive_child(id, i)? == Outcome::Stop {
                            return Ok(Outcome::Stop);
                        }
                    }
                    Ok(Outcome::Continue)
                }
                JoinAlgo::SimpleHashJoin => {
                    if self.drive_child(id, 0)? == Outcome::Stop {
                        return Ok(Outcome::Stop);
                    }
                    if let OpState::HashJoin { probing, .. } = &mut self.states[id] {
                        *probing = true;
                    }
                    self.drive_child(id, 1)
                }
            },
            OperatorKind::Projection { .. } => {
                if self.children[id].is_empty() {
                    // Constant projection: evaluate exactly once.
                    let mut empty = Tuple::with_len(0);
                    return self.consume(id, &mut empty);
                }
                self.drive_child(id, 0)
            }
            OperatorKind::Grouping { .. } | OperatorKind::Aggregation { .. } => {
                if self.drive_child(id, 0)? == Outcome::Stop {
                    return Ok(Outcome::Stop);
                }
                self.finalize_grouping(id)
            }
            OperatorKind::Sorting { .. } => {
                if self.drive_child(id, 0)? == Outcome::Stop {
                    return Ok(Outcome::Stop);
                }
                self.finalize_sorting(id)
            }
            OperatorKind::Limit { .. } => {
                // The early-exit sentinel unwinds exactly this producer tree.
                let _ = self.drive_child(id, 0)?;
                Ok(Outcome::Continue)
            }
            OperatorKind::Callback | OperatorKind::Print | OperatorKind::NoOp => {
                self.drive_child(id, 0)
            }
        }
    }

    fn drive_child(&mut self, id: usize, i: usize) -> Result<Outcome, ExecError> {
        let child = self.children[id][i];
        self.drive(child)
    }

    fn drive_scan(&mut self, id: usize) -> Result<Outcome, ExecError> {
        let parent = self.parent[id].expect("scan has a parent");
        let schema = self.nodes[id].schema().clone();
        let mut state = std::mem::take(&mut self.states[id]);
        let result = (|| {
            let OpState::Scan { loader, rows } = &mut state else {
                unreachable!("scan state");
            };
            for _ in 0..*rows {
                let mut tuple = Tuple::new(&schema);
                loader.run(&mut [&mut tuple])?;
                if self.consume(parent, &mut tuple)? == Outcome::Stop {
                    return Ok(Outcome::Stop);
                }
            }
            Ok(Outcome::Continue)
        })();
        self.states[id] = state;
        result
    }

    /// Pushes one tuple into the consumer `id`.
    fn consume(&mut self, id: usize, tuple: &mut Tuple) -> Result<Outcome, ExecError> {
        let mut state = std::mem::take(&mut self.states[id]);
        let result = self.consume_with(id, &mut state, tuple);
        self.states[id] = state;
        result
    }

    fn consume_with(
        &mut self,
        id: usize,
        state: &mut OpState,
        tuple: &mut Tuple,
    ) -> Result<Outcome, ExecError> {
        let node = self.nodes[id];
        match (&node.kind, state) {
            (OperatorKind::Filter { .. }, OpState::Filter { machine }) => {
                machine.run(&mut [&mut *tuple])?;
                let (v, null) = machine.top();
                // A predicate evaluating to NULL filters like FALSE.
                if !null && v.as_bool() {
                    let parent = self.parent[id].expect("filter has a parent");
                    return self.consume(parent, tuple);
                }
                Ok(Outcome::Continue)
            }
            (OperatorKind::Projection { .. }, OpState::Projection { machine }) => {
                let mut out = Tuple::new(node.schema());
                machine.run(&mut [&mut out, &mut *tuple])?;
                let parent = self.parent[id].expect("projection has a parent");
                self.consume(parent, &mut out)
            }
            (
                OperatorKind::Join { .. },
                OpState::NestedLoops {
                    predicate,
                    buffers,
                    offsets,
                    active_child,
                },
            ) => {
                let num_children = self.children[id].len();
                if *active_child != num_children - 1 {
                    buffers[*active_child].push(tuple.clone_tuple());
                    return Ok(Outcome::Continue);
                }
                // Right-most child: iterate the cartesian product of the
                // buffered tuples with an odometer over per-child positions.
                let mut positions = vec![0usize; num_children - 1];
                if buffers.iter().any(|b| b.is_empty()) {
                    return Ok(Outcome::Continue);
                }
                let parent = self.parent[id].expect("join has a parent");
                let width = node.schema().num_entries();
                loop {
                    let mut combined = Tuple::with_len(width);
                    for (child, &pos) in positions.iter().enumerate() {
                        let buffered = &buffers[child][pos];
                        for i in 0..buffered.len() {
                            combined.set_with_null(
                                offsets[child] + i,
                                buffered.value(i).clone(),
                                buffered.is_null(i),
                            );
                        }
                    }
                    let last = offsets[num_children - 1];
                    for i in 0..tuple.len() {
                        combined.set_with_null(last + i, tuple.value(i).clone(), tuple.is_null(i));
                    }
                    predicate.run(&mut [&mut combined])?;
                    let (v, null) = predicate.top();
                    if !null && v.as_bool() {
                        if self.consume(parent, &mut combined)? == Outcome::Stop {
                            return Ok(Outcome::Stop);
                        }
                    }
                    // advance the odometer
                    let mut child = num_children - 2;
                    loop {
                        positions[child] += 1;
                        if positions[child] < buffers[child].len() {
                            break;
                        }
                        positions[child] = 0;
                        if child == 0 {
                            return Ok(Outcome::Continue);
                        }
                        child -= 1;
                    }
                }
            }
            (
                OperatorKind::Join { .. },
                OpState::HashJoin {
                    build_index,
                    probe_index,
                    left_len,
                    table,
                    probing,
                },
            ) => {
                if !*probing {
                    if !tuple.is_null(*build_index) {
                        table
                            .entry(tuple.value(*build_index).clone())
                            .or_default()
                            .push(tuple.clone_tuple());
                    }
                    return Ok(Outcome::Continue);
                }
                if tuple.is_null(*probe_index) {
                    return Ok(Outcome::Continue);
                }
                let Some(matches) = table.get(tuple.value(*probe_index)) else {
                    return Ok(Outcome::Continue);
                };
                let parent = self.parent[id].expect("join has a parent");
                let width = node.schema().num_entries();
                let matches = matches.clone();
                for m in &matches {
                    let mut combined = Tuple::with_len(width);
                    combined.insert(m, 0, m.len());
                    for i in 0..tuple.len() {
                        combined.set_with_null(
                            *left_len + i,
                            tuple.value(i).clone(),
                            tuple.is_null(i),
                        );
                    }
                    if self.consume(parent, &mut combined)? == Outcome::Stop {
                        return Ok(Outcome::Stop);
                    }
                }
                Ok(Outcome::Continue)
            }
            (
                OperatorKind::Grouping { aggregates, .. },
                OpState::Grouping {
                    keys,
                    num_keys,
                    args,
                    groups,
                    index,
                    ordered,
                },
            ) => {
                let aggregates = aggregates.clone();
                let mut key = Tuple::with_len(*num_keys);
                keys.run(&mut [&mut key, &mut *tuple])?;
                if *ordered {
                    // A key change ends the current run; emit it.
                    let run_ended = groups
                        .last()
                        .map(|g| g.key != key)
                        .unwrap_or(false);
                    if run_ended {
                        let group = groups.pop().expect("run exists");
                        let parent = self.parent[id].expect("grouping has a parent");
                        let mut out = emit_group(node.schema(), group, &aggregates);
                        if self.consume(parent, &mut out)? == Outcome::Stop {
                            return Ok(Outcome::Stop);
                        }
                    }
                    if groups.is_empty() || groups.last().map(|g| g.key != key).unwrap_or(true) {
                        groups.push(new_group(key.clone_tuple(), &aggregates));
                    }
                    let group = groups.last_mut().expect("run exists");
                    update_aggregates(group, &aggregates, args, tuple)?;
                } else {
                    let slot = match index.get(&key) {
                        Some(&slot) => slot,
                        None => {
                            groups.push(new_group(key.clone_tuple(), &aggregates));
                            index.insert(key.clone_tuple(), groups.len() - 1);
                            groups.len() - 1
                        }
                    };
                    update_aggregates(&mut groups[slot], &aggregates, args, tuple)?;
                }
                Ok(Outcome::Continue)
            }
            (
                OperatorKind::Aggregation { aggregates },
                OpState::Grouping { groups, args, .. },
            ) => {
                let aggregates = aggregates.clone();
                if groups.is_empty() {
                    groups.push(new_group(Tuple::with_len(0), &aggregates));
                }
                update_aggregates(&mut groups[0], &aggregates, args, tuple)?;
                Ok(Outcome::Continue)
            }
            (OperatorKind::Sorting { .. }, OpState::Sorting { buffer }) => {
                buffer.push(tuple.clone_tuple());
                Ok(Outcome::Continue)
            }
            (OperatorKind::Limit { limit, offset }, OpState::Limit { seen }) => {
                let position = *seen;
                *seen += 1;
                if position < *offset {
                    return Ok(Outcome::Continue);
                }
                if position < offset.saturating_add(*limit) {
                    let parent = self.parent[id].expect("limit has a parent");
                    if self.consume(parent, tuple)? == Outcome::Stop {
                        return Ok(Outcome::Stop);
                    }
                    if position + 1 == offset.saturating_add(*limit) {
                        return Ok(Outcome::Stop);
                    }
                    return Ok(Outcome::Continue);
                }
                Ok(Outcome::Stop)
            }
            (OperatorKind::Callback, OpState::Sink) => {
                self.emitted += 1;
                if let Sink::Callback(f) = &mut self.sink {
                    f(node.schema(), tuple);
                }
                Ok(Outcome::Continue)
            }
            (OperatorKind::Print, OpState::Sink) => {
                self.emitted += 1;
                if let Sink::Print(w) = &mut self.sink {
                    writeln!(w, "{tuple}").map_err(|e| ExecError::Output(e.to_string()))?;
                }
                Ok(Outcome::Continue)
            }
            (OperatorKind::NoOp, OpState::Sink) => {
                self.emitted += 1;
                Ok(Outcome::Continue)
            }
            _ => unreachable!("operator state mismatch"),
        }
    }

    /// Emits the accumulated groups upward.
    fn finalize_grouping(&mut self, id: usize) -> Result<Outcome, ExecError> {
        let node = self.nodes[id];
        let aggregates = match &node.kind {
            OperatorKind::Grouping { aggregates, .. }
            | OperatorKind::Aggregation { aggregates } => aggregates.clone(),
            _ => unreachable!(),
        };
        let mut state = std::mem::take(&mut self.states[id]);
        let result = (|| {
            let OpState::Grouping { groups, .. } = &mut state else {
                unreachable!("grouping state");
            };
            // An aggregation without keys produces its single row even for
            // empty input.
            if groups.is_empty() && matches!(node.kind, OperatorKind::Aggregation { .. }) {
                groups.push(new_group(Tuple::with_len(0), &aggregates));
            }
            let parent = self.parent[id].expect("grouping has a parent");
            for group in std::mem::take(groups) {
                let mut out = emit_group(node.schema(), group, &aggregates);
                if self.consume(parent, &mut out)? == Outcome::Stop {
                    return Ok(Outcome::Stop);
                }
            }
            Ok(Outcome::Continue)
        })();
        self.states[id] = state;
        result
    }

    /// Sorts the buffered tuples with a compiled comparator and emits them.
    fn finalize_sorting(&mut self, id: usize) -> Result<Outcome, ExecError> {
        let node = self.nodes[id];
        let OperatorKind::Sorting { order_by } = &node.kind else {
            unreachable!()
        };

        // The comparator evaluates each ordering key on both tuples, takes
        // the three-way comparison (negated for descending keys), and stops
        // at the first non-zero result.
        let mut comparator = StackMachine::new();
        for (expr, ascending) in order_by {
            for tuple_id in 0..2 {
                let mut compiler =
                    ExprCompiler::new(&mut comparator, node.schema(), self.catalog, tuple_id);
                compiler.compile(expr)?;
            }
            let op = match vm_family(expr.ty())? {
                SortFam::Bool => Op::CmpB,
                SortFam::Int => Op::CmpI,
                SortFam::Float => Op::CmpF,
                SortFam::Double => Op::CmpD,
                SortFam::Str => Op::CmpS,
            };
            comparator.emit(op);
            if !ascending {
                comparator.emit(Op::MinusI);
            }
            comparator.emit(Op::StopNZ);
        }

        let mut state = std::mem::take(&mut self.states[id]);
        let result = (|| {
            let OpState::Sorting { buffer } = &mut state else {
                unreachable!("sorting state");
            };
            let mut error = None;
            buffer.sort_by(|a, b| {
                if error.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                let mut a = a.clone_tuple();
                let mut b = b.clone_tuple();
                if let Err(e) = comparator.run(&mut [&mut a, &mut b]) {
                    error = Some(e);
                    return std::cmp::Ordering::Equal;
                }
                let (v, null) = comparator.top();
                if null {
                    return std::cmp::Ordering::Equal;
                }
                v.as_int().cmp(&0)
            });
            if let Some(e) = error {
                return Err(e);
            }
            let parent = self.parent[id].expect("sorting has a parent");
            for mut t in std::mem::take(buffer) {
                if self.consume(parent, &mut t)? == Outcome::Stop {
                    return Ok(Outcome::Stop);
                }
            }
            Ok(Outcome::Continue)
        })();
        self.states[id] = state;
        result
    }
}

enum SortFam {
    Bool,
    Int,
    Float,
    Double,
    Str,
}

fn vm_family(ty: &crate::catalog::Type) -> Result<SortFam, ExecError> {
    if ty.is_boolean() {
        Ok(SortFam::Bool)
    } else if ty.is_character_sequence() {
        Ok(SortFam::Str)
    } else if ty.is_integral() || ty.is_decimal() {
        Ok(SortFam::Int)
    } else if ty.is_float() {
        Ok(SortFam::Float)
    } else if ty.is_double() {
        Ok(SortFam::Double)
    } else {
        Err(ExecError::IllTyped(ty.to_string()))
    }
}

/// A fresh group: count cells start at zero, the rest at NULL.
fn new_group(key: Tuple, aggregates: &[Rc<Expr>]) -> Group {
    let cells = aggregates
        .iter()
        .map(|agg| {
            let fnid = match agg.as_ref() {
                Expr::FnApp { fnid, .. } => *fnid,
                _ => Fnid::Count,
            };
            AggCell {
                value: Value::Int(0),
                null: fnid != Fnid::Count,
                avg: (0.0, 0),
            }
        })
        .collect();
    Group { key, cells }
}

/// Folds one input tuple into the group's aggregate cells.
fn update_aggregates(
    group: &mut Group,
    aggregates: &[Rc<Expr>],
    args: &mut [Option<StackMachine>],
    tuple: &mut Tuple,
) -> Result<(), ExecError> {
    for (i, agg) in aggregates.iter().enumerate() {
        let Expr::FnApp { fnid, ty, .. } = agg.as_ref() else {
            return Err(ExecError::IllTyped(agg.to_string()));
        };
        let arg = match &mut args[i] {
            Some(machine) => {
                machine.run(&mut [&mut *tuple])?;
                Some(machine.top())
            }
            None => None,
        };
        let cell = &mut group.cells[i];
        match fnid {
            Fnid::Count => match arg {
                // COUNT(*) counts every tuple.
                None => cell.value = Value::Int(cell.value.as_int() + 1),
                Some((_, null)) => {
                    if !null {
                        cell.value = Value::Int(cell.value.as_int() + 1);
                    }
                }
            },
            Fnid::Sum => {
                let (v, null) = arg.expect("SUM has an argument");
                if null {
                    continue;
                }
                if ty.is_floating_point() {
                    let add = to_double(&v);
                    let acc = if cell.null { 0.0 } else { cell.value.as_double() };
                    cell.value = Value::Double(acc + add);
                } else {
                    let add = to_int(&v);
                    let acc = if cell.null { 0 } else { cell.value.as_int() };
                    cell.value = Value::Int(acc.wrapping_add(add));
                }
                cell.null = false;
            }
            Fnid::Min | Fnid::Max => {
                let (v, null) = arg.expect("MIN/MAX has an argument");
                if null {
                    continue;
                }
                if cell.null {
                    cell.value = v;
                    cell.null = false;
                    continue;
                }
                let keep_new = match (&cell.value, &v) {
                    (Value::Int(a), Value::Int(b)) => {
                        if *fnid == Fnid::Min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                    (Value::Float(a), Value::Float(b)) => {
                        if *fnid == Fnid::Min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                    (Value::Double(a), Value::Double(b)) => {
                        if *fnid == Fnid::Min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                    (Value::Str(a), Value::Str(b)) => {
                        if *fnid == Fnid::Min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                    _ => false,
                };
                if keep_new {
                    cell.value = v;
                }
            }
            Fnid::Avg => {
                let (v, null) = arg.expect("AVG has an argument");
                if null {
                    continue;
                }
                cell.avg.0 += to_double(&v);
                cell.avg.1 += 1;
                cell.null = false;
            }
            _ => return Err(ExecError::Unsupported(format!("aggregate {}", fnid.name()))),
        }
    }
    Ok(())
}

/// Materializes one group into an output tuple: keys first, then the
/// finalized aggregates (`AVG` divides its running sum by its count here,
/// not incrementally).
fn emit_group(schema: &Schema, group: Group, aggregates: &[Rc<Expr>]) -> Tuple {
    let mut out = Tuple::new(schema);
    let num_keys = group.key.len();
    out.insert(&group.key, 0, num_keys);
    for (i, (cell, agg)) in group.cells.into_iter().zip(aggregates).enumerate() {
        let fnid = match agg.as_ref() {
            Expr::FnApp { fnid, .. } => *fnid,
            _ => Fnid::Count,
        };
        if fnid == Fnid::Avg {
            if cell.avg.1 == 0 {
                out.set_null(num_keys + i);
            } else {
                out.set(num_keys + i, Value::Double(cell.avg.0 / cell.avg.1 as f64));
            }
        } else if cell.null {
            out.set_null(num_keys + i);
        } else {
            out.set(num_keys + i, cell.value);
        }
    }
    out
}

fn to_double(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => f64::from(*f),
        Value::Double(d) => *d,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Str(_) => 0.0,
    }
}

fn to_int(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Float(f) => *f as i64,
        Value::Double(d) => *d as i64,
        Value::Bool(b) => i64::from(*b),
        Value::Str(_) => 0,
    }
}
