//! The catalog: databases, tables, attributes, and the string pool.
//!
//! There is no process-wide singleton; a `&Catalog` is passed into the graph
//! builder, the optimizer and the executor.  Tables are populated during DDL
//! and read-only during query execution.

pub mod pool;
pub mod schema;
pub mod types;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::CatalogError;
use crate::storage::Store;
use crate::util::SmallBitset;

pub use pool::{StringPool, Symbol};
pub use schema::{Entry, Ident, Schema};
pub use types::{arithmetic_join, NumericKind, Type, TypeCategory};

/// An attribute of a table.  Attribute ids are dense from 0 within their
/// table and double as bit indices in `SmallBitset`s.
#[derive(Clone)]
pub struct Attribute {
    pub id: usize,
    pub table: Symbol,
    pub ty: Type,
    pub name: Symbol,
    pub nullable: bool,
}

/// A table: a name, an ordered set of attributes, a backing store and a
/// primary key.
pub struct Table {
    pub name: Symbol,
    attrs: Vec<Attribute>,
    store: Option<Rc<RefCell<dyn Store>>>,
    primary_key: SmallBitset,
}

impl Table {
    pub fn new(name: Symbol) -> Self {
        Table {
            name,
            attrs: Vec::new(),
            store: None,
            primary_key: SmallBitset::empty(),
        }
    }

    pub fn num_attrs(&self) -> usize {
        self.attrs.len()
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// The attribute with the given dense id.  An out-of-range id indicates a
    /// bug in the plan builder and panics.
    pub fn attr(&self, id: usize) -> &Attribute {
        assert!(id < self.attrs.len(), "attribute id out of bounds");
        &self.attrs[id]
    }

    pub fn attr_by_name(&self, name: &Symbol) -> Result<&Attribute, CatalogError> {
        self.attrs
            .iter()
            .find(|a| a.name == *name)
            .ok_or_else(|| CatalogError::UnknownAttribute(name.to_string()))
    }

    /// Appends an attribute.  The new attribute gets the next dense id.
    pub fn push_back(&mut self, name: Symbol, ty: Type) -> Result<(), CatalogError> {
        if self.attrs.iter().any(|a| a.name == name) {
            return Err(CatalogError::DuplicateAttribute(name.to_string()));
        }
        self.attrs.push(Attribute {
            id: self.attrs.len(),
            table: self.name.clone(),
            ty,
            name,
            nullable: true,
        });
        Ok(())
    }

    /// Adds the attribute with the given `name` to the primary key.
    pub fn add_primary_key(&mut self, name: &Symbol) -> Result<(), CatalogError> {
        let id = self.attr_by_name(name)?.id;
        self.primary_key.set(id);
        Ok(())
    }

    /// The primary key as a bitset over attribute ids.
    pub fn primary_key(&self) -> SmallBitset {
        self.primary_key
    }

    pub fn set_store(&mut self, store: Rc<RefCell<dyn Store>>) {
        self.store = Some(store);
    }

    /// The backing store.  Accessing a store-less table is a bug in the
    /// driver and panics.
    pub fn store(&self) -> Rc<RefCell<dyn Store>> {
        Rc::clone(self.store.as_ref().expect("table has no store"))
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// The schema of this table: every attribute, prefixed with the table
    /// name.
    pub fn schema(&self) -> Schema {
        self.schema_with_prefix(&self.name)
    }

    /// The schema of this table renamed by `prefix` (the source alias).
    pub fn schema_with_prefix(&self, prefix: &Symbol) -> Schema {
        let mut s = Schema::new();
        for attr in &self.attrs {
            s.add(Ident::qualified(prefix.clone(), attr.name.clone()), attr.ty.clone())
                .expect("table attributes are unique");
        }
        s
    }
}

/// A set of named tables.
pub struct Database {
    pub name: Symbol,
    tables: HashMap<Symbol, Table>,
}

impl Database {
    fn new(name: Symbol) -> Self {
        Database {
            name,
            tables: HashMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.tables.len()
    }

    pub fn get_table(&self, name: &Symbol) -> Result<&Table, CatalogError> {
        self.tables
            .get(name)
            .ok_or_else(|| CatalogError::UnknownTable(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &Symbol) -> Result<&mut Table, CatalogError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| CatalogError::UnknownTable(name.to_string()))
    }

    pub fn add_table(&mut self, name: Symbol) -> Result<&mut Table, CatalogError> {
        if self.tables.contains_key(&name) {
            return Err(CatalogError::DuplicateTable(name.to_string()));
        }
        Ok(self
            .tables
            .entry(name.clone())
            .or_insert_with(|| Table::new(name)))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

/// The registry of databases and the string pool.
#[derive(Default)]
pub struct Catalog {
    pool: StringPool,
    databases: HashMap<Symbol, Database>,
    database_in_use: Option<Symbol>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    /// Interns `s` in the catalog's string pool.
    pub fn intern(&self, s: &str) -> Symbol {
        self.pool.intern(s)
    }

    pub fn add_database(&mut self, name: &str) -> Result<&mut Database, CatalogError> {
        let name = self.pool.intern(name);
        if self.databases.contains_key(&name) {
            return Err(CatalogError::DuplicateDatabase(name.to_string()));
        }
        Ok(self
            .databases
            .entry(name.clone())
            .or_insert_with(|| Database::new(name)))
    }

    pub fn set_database_in_use(&mut self, name: &str) -> Result<(), CatalogError> {
        let name = self.pool.intern(name);
        if !self.databases.contains_key(&name) {
            return Err(CatalogError::UnknownDatabase(name.to_string()));
        }
        self.database_in_use = Some(name);
        Ok(())
    }

    pub fn get_database_in_use(&self) -> Result<&Database, CatalogError> {
        let name = self
            .database_in_use
            .as_ref()
            .ok_or(CatalogError::NoDatabaseInUse)?;
        Ok(&self.databases[name])
    }

    pub fn get_database_in_use_mut(&mut self) -> Result<&mut Database, CatalogError> {
        let name = self
            .database_in_use
            .clone()
            .ok_or(CatalogError::NoDatabaseInUse)?;
        Ok(self.databases.get_mut(&name).expect("database in use exists"))
    }
}
