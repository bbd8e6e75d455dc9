//! Cardinality estimation.
//!
//! The estimator hands out opaque [`DataModel`]s, one per subproblem, and
//! predicts result sizes for scan, filter, join, grouping and limit.  Two
//! implementations exist: the cartesian estimator multiplies input sizes,
//! the injection estimator looks sizes up in a user-provided statistics
//! document and falls back to the cartesian rule on a miss.

use std::collections::HashMap;
use std::rc::Rc;

use serde::Deserialize;
use tracing::debug;

use crate::ast::cnf::Cnf;
use crate::ast::Expr;
use crate::catalog::Catalog;
use crate::error::PlanError;
use crate::ir::{QueryGraph, SourceKind};
use crate::util::SmallBitset;

/// The opaque statistical profile of a relational subexpression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataModel {
    Cartesian {
        size: u64,
    },
    /// Carries the sorted set of participating relation names; the set
    /// identity keys the injected statistics.
    Injection {
        relations: Vec<String>,
        size: u64,
    },
}

impl DataModel {
    pub fn size(&self) -> u64 {
        match self {
            DataModel::Cartesian { size } | DataModel::Injection { size, .. } => *size,
        }
    }
}

pub trait CardinalityEstimator {
    fn name(&self) -> &'static str;

    /// The model of scanning the single source in `s`.
    fn estimate_scan(&self, catalog: &Catalog, graph: &QueryGraph, s: SmallBitset) -> DataModel;

    /// The model after applying `filter`.  Never larger than the input.
    fn estimate_filter(&self, graph: &QueryGraph, model: &DataModel, filter: &Cnf) -> DataModel;

    /// The model of joining `left` and `right` under `condition`.
    fn estimate_join(
        &self,
        graph: &QueryGraph,
        left: &DataModel,
        right: &DataModel,
        condition: &Cnf,
    ) -> DataModel;

    /// The model after grouping by `group_by`; collapses to one row without
    /// keys.
    fn estimate_grouping(
        &self,
        graph: &QueryGraph,
        model: &DataModel,
        group_by: &[Rc<Expr>],
    ) -> DataModel;

    /// The model after `LIMIT limit OFFSET offset`.
    fn estimate_limit(
        &self,
        graph: &QueryGraph,
        model: &DataModel,
        limit: u64,
        offset: u64,
    ) -> DataModel;

    fn predict_cardinality(&self, model: &DataModel) -> u64 {
        model.size()
    }
}

/// The row count of the single source in `s`, read from the backing store.
/// Nested queries report their optimized size through the plan table instead;
/// here they count one row.
fn scan_rows(catalog: &Catalog, graph: &QueryGraph, s: SmallBitset) -> u64 {
    assert_eq!(s.len(), 1, "scan estimates take a singleton subproblem");
    let id = s.least_element().expect("non-empty");
    let ds = graph.source(id);
    match &ds.kind {
        SourceKind::BaseTable { table } => catalog
            .get_database_in_use()
            .and_then(|db| db.get_table(table))
            .map(|t| t.store().borrow().num_rows())
            .unwrap_or(0),
        SourceKind::SubQuery { .. } => 1,
    }
}

/// Estimates every operation by preserving or multiplying input sizes.
#[derive(Default)]
pub struct CartesianEstimator;

impl CardinalityEstimator for CartesianEstimator {
    fn name(&self) -> &'static str {
        "Cartesian"
    }

    fn estimate_scan(&self, catalog: &Catalog, graph: &QueryGraph, s: SmallBitset) -> DataModel {
        DataModel::Cartesian {
            size: scan_rows(catalog, graph, s),
        }
    }

    fn estimate_filter(&self, _graph: &QueryGraph, model: &DataModel, _filter: &Cnf) -> DataModel {
        DataModel::Cartesian { size: model.size() }
    }

    fn estimate_join(
        &self,
        _graph: &QueryGraph,
        left: &DataModel,
        right: &DataModel,
        _condition: &Cnf,
    ) -> DataModel {
        DataModel::Cartesian {
            size: left.size().saturating_mul(right.size()),
        }
    }

    fn estimate_grouping(
        &self,
        _graph: &QueryGraph,
        model: &DataModel,
        group_by: &[Rc<Expr>],
    ) -> DataModel {
        DataModel::Cartesian {
            size: if group_by.is_empty() { 1 } else { model.size() },
        }
    }

    fn estimate_limit(
        &self,
        _graph: &QueryGraph,
        model: &DataModel,
        limit: u64,
        _offset: u64,
    ) -> DataModel {
        DataModel::Cartesian {
            size: model.size().min(limit),
        }
    }
}

#[derive(Deserialize)]
struct InjectedEntry {
    relations: Vec<String>,
    size: u64,
}

/// Looks up sizes per relation set in a statistics document of the shape
/// `{ "<database>": [ { "relations": ["A", "B"], "size": 1234 } ] }`.
///
/// The lookup key is the sorted list of relation names; order in the
/// document does not matter.  A missing entry -- including a document for a
/// different database -- silently falls back to the cartesian rule.
pub struct InjectionEstimator {
    sizes: HashMap<Vec<String>, u64>,
}

impl InjectionEstimator {
    pub fn from_json(database: &str, json: &str) -> Result<Self, PlanError> {
        let doc: HashMap<String, Vec<InjectedEntry>> = serde_json::from_str(json)
            .map_err(|e| PlanError::MalformedStatistics(e.to_string()))?;
        let mut sizes = HashMap::new();
        match doc.get(database) {
            Some(entries) => {
                for entry in entries {
                    let mut key = entry.relations.clone();
                    key.sort_unstable();
                    sizes.insert(key, entry.size);
                }
            }
            None => {
                debug!(database, "statistics document has no matching database");
            }
        }
        Ok(InjectionEstimator { sizes })
    }

    fn relations_of(graph: &QueryGraph, s: SmallBitset) -> Vec<String> {
        let mut names: Vec<String> = s
            .iter()
            .map(|id| graph.source(id).name().to_string())
            .collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, relations: &[String]) -> Option<u64> {
        self.sizes.get(relations).copied()
    }
}

impl CardinalityEstimator for InjectionEstimator {
    fn name(&self) -> &'static str {
        "Injection"
    }

    fn estimate_scan(&self, catalog: &Catalog, graph: &QueryGraph, s: SmallBitset) -> DataModel {
        let relations = Self::relations_of(graph, s);
        let size = match self.lookup(&relations) {
            Some(size) => size,
            None => scan_rows(catalog, graph, s),
        };
        DataModel::Injection { relations, size }
    }

    fn estimate_filter(&self, _graph: &QueryGraph, model: &DataModel, _filter: &Cnf) -> DataModel {
        model.clone()
    }

    fn estimate_join(
        &self,
        _graph: &QueryGraph,
        left: &DataModel,
        right: &DataModel,
        _condition: &Cnf,
    ) -> DataModel {
        let (DataModel::Injection { relations: l, .. }, DataModel::Injection { relations: r, .. }) =
            (left, right)
        else {
            // Mixed models degenerate to the cartesian rule.
            return DataModel::Cartesian {
                size: left.size().saturating_mul(right.size()),
            };
        };
        let mut relations: Vec<String> = l.iter().chain(r.iter()).cloned().collect();
        relations.sort_unstable();
        relations.dedup();
        let size = self
            .lookup(&relations)
            .unwrap_or_else(|| left.size().saturating_mul(right.size()));
        DataModel::Injection { relations, size }
    }

    fn estimate_grouping(
        &self,
        _graph: &QueryGraph,
        model: &DataModel,
        group_by: &[Rc<Expr>],
    ) -> DataModel {
        let size = if group_by.is_empty() { 1 } else { model.size() };
        match model {
            DataModel::Injection { relations, .. } => DataModel::Injection {
                relations: relations.clone(),
                size,
            },
            DataModel::Cartesian { .. } => DataModel::Cartesian { size },
        }
    }

    fn estimate_limit(
        &self,
        _graph: &QueryGraph,
        model: &DataModel,
        limit: u64,
        _offset: u64,
    ) -> DataModel {
        let size = model.size().min(limit);
        match model {
            DataModel::Injection { relations, .. } => DataModel::Injection {
                relations: relations.clone(),
                size,
            },
            DataModel::Cartesian { .. } => DataModel::Cartesian { size },
        }
    }
}

/// Resolves an estimator by name: `"Cartesian"` or `"Injection"`.
pub fn estimator_from_name(
    name: &str,
    database: &str,
    statistics_json: Option<&str>,
) -> Result<Box<dyn CardinalityEstimator>, PlanError> {
    match name {
        "Cartesian" => Ok(Box::new(CartesianEstimator)),
        "Injection" => {
            let json = statistics_json.unwrap_or("{}");
            Ok(Box::new(InjectionEstimator::from_json(database, json)?))
        }
        other => Err(PlanError::UnknownEstimator(other.to_string())),
    }
}
