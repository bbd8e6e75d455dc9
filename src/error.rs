//! Error types, one enum per concern area.

use thiserror::Error;

/// Errors raised by catalog and schema manipulation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A database with that name already exists.
    #[error("database already exists: {0}")]
    DuplicateDatabase(String),

    /// No database with that name is registered.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// No database has been selected for use.
    #[error("no database in use")]
    NoDatabaseInUse,

    /// A table with that name already exists in the database.
    #[error("table already exists: {0}")]
    DuplicateTable(String),

    /// No table with that name exists in the database.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// An attribute with that name already exists in the table.
    #[error("attribute name already in use: {0}")]
    DuplicateAttribute(String),

    /// No attribute with that name exists in the table.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Adding this identifier would duplicate an existing schema entry.
    /// The schema is left unchanged.
    #[error("duplicate identifier in schema: {0}")]
    DuplicateIdentifier(String),

    /// A bare name matched more than one schema entry.
    #[error("duplicate identifier, lookup ambiguous: {0}")]
    AmbiguousIdentifier(String),

    /// The identifier was not found in the schema.
    #[error("identifier not found: {0}")]
    IdentifierNotFound(String),
}

/// Errors raised while building the query graph or searching for a plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The adjacency matrix only represents binary joins.
    #[error("building adjacency matrix for non-binary join")]
    NonBinaryJoin,

    /// No plan enumerator is registered under that name.
    #[error("unknown plan enumerator: {0}")]
    UnknownEnumerator(String),

    /// No cardinality estimator is registered under that name.
    #[error("unknown cardinality estimator: {0}")]
    UnknownEstimator(String),

    /// The injected statistics document could not be parsed.
    #[error("malformed statistics document: {0}")]
    MalformedStatistics(String),

    /// A statement shape the graph builder does not accept.
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Errors raised while compiling or running a physical plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// A feature the execution backend does not implement.  Recovery is not
    /// possible; the query is aborted.
    #[error("not supported by this backend: {0}")]
    Unsupported(String),

    /// A `LIKE` pattern ended in a dangling escape character or escaped a
    /// character that is neither a wildcard nor the escape character itself.
    #[error("invalid escape sequence in LIKE pattern: {0}")]
    InvalidEscape(String),

    /// An expression references an identifier the operator schema does not
    /// provide.  Indicates a bug in the plan builder.
    #[error("expression references unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// The expression compiler met an operand type it has no opcode for.
    #[error("cannot compile expression of type {0}")]
    IllTyped(String),

    /// Writing to the output sink failed.
    #[error("output failed: {0}")]
    Output(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
