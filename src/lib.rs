//! # quillsql
//!
//! An in-process SQL query engine with cost-based join ordering.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Typed AST (SelectStmt, Expr, CNF)             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [graph builder]
//! ┌─────────────────────────────────────────────────────────┐
//! │       QueryGraph (sources, joins, grouping, limit)       │
//! │              + AdjacencyMatrix (join graph)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan enumerator + cost function]
//! ┌─────────────────────────────────────────────────────────┐
//! │       PlanTable (DP over the subproblem lattice,         │
//! │            guided by a cardinality estimator)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan constructor]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Physical operator tree (scans, joins, grouping)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [pipeline interpreter + stack machine]
//! ┌─────────────────────────────────────────────────────────┐
//! │       Result tuples, pushed into a sink per tuple        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod ast;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod exec;
pub mod ir;
pub mod ops;
pub mod planner;
pub mod storage;
pub mod util;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::ast::{
        // Constructors
        and,
        binary,
        col,
        count_star,
        eq,
        fn_app,
        fn_call,
        lit_bool,
        lit_float,
        lit_int,
        lit_null,
        lit_str,
        not,
        or,
        outer_col,
        query_expr,
        table_col,
        unary,
        // Types
        BinOp,
        Expr,
        Fnid,
        Literal,
        SelectItem,
        SelectStmt,
        TableRef,
        UnOp,
    };
    pub use crate::catalog::{Catalog, Ident, Schema, Symbol, Type, TypeCategory};
    pub use crate::engine::{Engine, EngineOptions};
    pub use crate::exec::{Sink, value::Tuple, value::Value};
    pub use crate::ir::{GraphBuilder, QueryGraph};
    pub use crate::util::SmallBitset;
}

pub use engine::{Engine, EngineOptions};
