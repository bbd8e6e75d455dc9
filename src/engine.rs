//! The engine façade: options, statement execution, DDL and DML against the
//! catalog.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ast::{CreateTableStmt, InsertStmt, Literal, SelectStmt};
use crate::catalog::{Catalog, Type};
use crate::error::{CatalogError, ExecError, PlanError};
use crate::exec::value::Value;
use crate::exec::{self, Sink};
use crate::ir::GraphBuilder;
use crate::ops::OperatorNode;
use crate::planner::cardinality::estimator_from_name;
use crate::planner::enumerator::{enumerator_from_name, PlanEnumerator};
use crate::planner::plan_table::PlanTable;
use crate::planner::Optimizer;
use crate::storage::{self, ColumnStore, RowStore, Store};

/// Errors surfaced to the engine's caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The options file could not be read or parsed.
    #[error("invalid engine options: {0}")]
    Options(String),
}

/// Engine construction options; loadable from a TOML document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// `"DPsize" | "DPsizeOpt" | "DPsub" | "DPsubOpt" | "DPccp"`
    pub plan_enumerator: String,
    /// `"Cartesian" | "Injection"`
    pub cardinality_estimator: String,
    /// The statistics document for the injection estimator, as JSON text.
    pub statistics: Option<String>,
    /// `"RowStore" | "ColumnStore"` -- the store new tables are backed by.
    pub store: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            plan_enumerator: "DPccp".into(),
            cardinality_estimator: "Cartesian".into(),
            statistics: None,
            store: "RowStore".into(),
        }
    }
}

impl EngineOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Options(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| EngineError::Options(e.to_string()))?;
        Self::from_toml_str(&text)
    }
}

/// One query engine instance.  Single-threaded; one query at a time.
pub struct Engine {
    options: EngineOptions,
    enumerator: Box<dyn PlanEnumerator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("enumerator", &self.enumerator.name())
            .finish()
    }
}

impl Engine {
    pub fn new() -> Engine {
        Engine::with_options(EngineOptions::default()).expect("default options are valid")
    }

    pub fn with_options(options: EngineOptions) -> Result<Engine, EngineError> {
        let enumerator = enumerator_from_name(&options.plan_enumerator)?;
        if !matches!(options.cardinality_estimator.as_str(), "Cartesian" | "Injection") {
            return Err(
                PlanError::UnknownEstimator(options.cardinality_estimator.clone()).into(),
            );
        }
        if !matches!(options.store.as_str(), "RowStore" | "ColumnStore") {
            return Err(EngineError::Options(format!(
                "unknown store: {}",
                options.store
            )));
        }
        Ok(Engine {
            options,
            enumerator,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Builds the query graph, optimizes it, and returns the physical plan
    /// together with the filled plan table.
    pub fn plan_select(
        &self,
        catalog: &Catalog,
        stmt: &SelectStmt,
    ) -> Result<(OperatorNode, PlanTable), EngineError> {
        let graph = GraphBuilder::new(catalog).build(stmt)?;
        let database = catalog.get_database_in_use()?.name.to_string();
        let estimator = estimator_from_name(
            &self.options.cardinality_estimator,
            &database,
            self.options.statistics.as_deref(),
        )?;
        let optimizer = Optimizer::new(self.enumerator.as_ref(), estimator.as_ref());
        Ok(optimizer.optimize(catalog, &graph)?)
    }

    /// Plans and runs a `SELECT`; returns the number of result tuples the
    /// sink received.
    pub fn execute_select(
        &self,
        catalog: &Catalog,
        stmt: &SelectStmt,
        sink: Sink,
    ) -> Result<u64, EngineError> {
        let (plan, _) = self.plan_select(catalog, stmt)?;
        // The sink operator mirrors the sink handed in.
        let mut root = match &sink {
            Sink::Callback(_) => OperatorNode::callback(),
            Sink::Print(_) => OperatorNode::print(),
            Sink::NoOp => OperatorNode::noop(),
        };
        root.add_child(plan);
        let rows = exec::execute(catalog, &root, sink)?;
        Ok(rows)
    }

    /// Creates a table with a fresh backing store.
    pub fn execute_create_table(
        &self,
        catalog: &mut Catalog,
        stmt: &CreateTableStmt,
    ) -> Result<(), EngineError> {
        let column_store = self.options.store == "ColumnStore";
        let db = catalog.get_database_in_use_mut()?;
        let table = db.add_table(stmt.table.clone())?;
        for col in &stmt.columns {
            table.push_back(col.name.clone(), col.ty.clone())?;
        }
        let mut primary = Vec::new();
        for col in &stmt.columns {
            if col.primary_key {
                primary.push(col.name.clone());
            }
        }
        for name in primary {
            table.add_primary_key(&name)?;
        }
        let types: Vec<Type> = stmt.columns.iter().map(|c| c.ty.clone()).collect();
        let store: Rc<RefCell<dyn Store>> = if column_store {
            Rc::new(RefCell::new(ColumnStore::new(types)))
        } else {
            Rc::new(RefCell::new(RowStore::new(types)))
        };
        table.set_store(store);
        debug!(table = %stmt.table, "created table");
        Ok(())
    }

    /// Appends rows to a table's store; returns the number of rows written.
    pub fn execute_insert(
        &self,
        catalog: &Catalog,
        stmt: &InsertStmt,
    ) -> Result<u64, EngineError> {
        let db = catalog.get_database_in_use()?;
        let table = db.get_table(&stmt.table)?;
        let store = table.store();
        for row in &stmt.rows {
            let id = store.borrow_mut().append();
            let store = store.borrow();
            for (attr, literal) in row.iter().enumerate() {
                let ty = &table.attr(attr).ty;
                let value = literal_to_value(ty, literal);
                storage::write_value(&*store, attr, id, value.as_ref());
            }
        }
        Ok(stmt.rows.len() as u64)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

fn literal_to_value(ty: &Type, literal: &Literal) -> Option<Value> {
    match literal {
        Literal::Null => None,
        Literal::Bool(b) => Some(Value::Bool(*b)),
        Literal::Int(i) => Some(match ty {
            t if t.is_float() => Value::Float(*i as f32),
            t if t.is_double() => Value::Double(*i as f64),
            t if t.is_decimal() => Value::Int(i * 10i64.pow(t.scale())),
            _ => Value::Int(*i),
        }),
        Literal::Float(f) => Some(match ty {
            t if t.is_float() => Value::Float(*f as f32),
            t if t.is_decimal() => Value::Int((f * 10f64.powi(t.scale() as i32)) as i64),
            _ => Value::Double(*f),
        }),
        Literal::Str(s) => Some(Value::Str(Rc::from(s.as_str()))),
    }
}
