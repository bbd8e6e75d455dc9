//! Schemas: ordered sequences of typed identifiers.

use std::fmt;
use std::ops::{Add, AddAssign, BitOr, BitOrAssign};

use crate::catalog::pool::Symbol;
use crate::catalog::types::Type;
use crate::error::CatalogError;

/// An identifier: a name with an optional prefix (the table or source alias).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub prefix: Option<Symbol>,
    pub name: Symbol,
}

impl Ident {
    pub fn new(prefix: Option<Symbol>, name: Symbol) -> Self {
        if let Some(p) = &prefix {
            assert!(!p.as_str().is_empty(), "prefix must not be the empty string");
        }
        Ident { prefix, name }
    }

    pub fn bare(name: Symbol) -> Self {
        Ident { prefix: None, name }
    }

    pub fn qualified(prefix: Symbol, name: Symbol) -> Self {
        Ident::new(Some(prefix), name)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.prefix {
            write!(f, "{p}.")?;
        }
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One schema entry.
#[derive(Clone, PartialEq)]
pub struct Entry {
    pub id: Ident,
    pub ty: Type,
    pub nullable: bool,
}

/// An ordered sequence of identifiers and their types.  Identifiers of the
/// same name may coexist under different prefixes.
#[derive(Clone, Default, Debug)]
pub struct Schema {
    entries: Vec<Entry>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// The entry at position `idx`.  An out-of-range index is a bug in the
    /// plan builder and panics.
    pub fn at(&self, idx: usize) -> &Entry {
        assert!(idx < self.entries.len(), "index out of bounds");
        &self.entries[idx]
    }

    /// Finds the position of the entry with identifier `id`.
    ///
    /// A qualified identifier matches exactly.  A bare identifier matches any
    /// entry with that name; if more than one entry matches the lookup is
    /// ambiguous.
    pub fn find(&self, id: &Ident) -> Result<Option<usize>, CatalogError> {
        let mut matches = self.entries.iter().enumerate().filter(|(_, e)| match &id.prefix {
            Some(_) => e.id == *id,
            None => e.id.name == id.name,
        });
        let first = matches.next();
        if let Some((idx, _)) = first {
            if matches.next().is_some() {
                return Err(CatalogError::AmbiguousIdentifier(id.to_string()));
            }
            return Ok(Some(idx));
        }
        Ok(None)
    }

    pub fn has(&self, id: &Ident) -> bool {
        matches!(self.find(id), Ok(Some(_)))
    }

    /// Adds an entry.  A duplicate identifier is signaled to the caller and
    /// the schema remains unchanged.
    pub fn add(&mut self, id: Ident, ty: Type) -> Result<(), CatalogError> {
        self.add_entry(Entry {
            id,
            ty,
            nullable: true,
        })
    }

    pub fn add_entry(&mut self, entry: Entry) -> Result<(), CatalogError> {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(CatalogError::DuplicateIdentifier(entry.id.to_string()));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Appends an entry with concatenation semantics: duplicates are
    /// allowed, and a bare lookup of a duplicated name reports ambiguity.
    pub fn push(&mut self, id: Ident, ty: Type) {
        self.entries.push(Entry {
            id,
            ty,
            nullable: true,
        });
    }

    /// Keeps only the entries `keep` accepts; preserves order.
    pub fn retain(&mut self, mut keep: impl FnMut(&Entry) -> bool) {
        self.entries.retain(|e| keep(e));
    }

    /// A deduplicated copy: duplicate identifiers are contained once.
    pub fn deduplicate(&self) -> Schema {
        let mut res = Schema::new();
        for e in &self.entries {
            if !res.entries.iter().any(|r| r.id == e.id) {
                res.entries.push(e.clone());
            }
        }
        res
    }

    /// The set intersection of two schemas.  Panics on a type mismatch for a
    /// shared identifier; that indicates a bug in the plan builder.
    pub fn intersect(&self, other: &Schema) -> Schema {
        let mut res = Schema::new();
        for e in &self.entries {
            if let Some(o) = other.entries.iter().find(|o| o.id == e.id) {
                assert!(o.ty == e.ty, "type mismatch");
                res.entries.push(e.clone());
            }
        }
        res
    }
}

/// Concatenation.
impl AddAssign<&Schema> for Schema {
    fn add_assign(&mut self, rhs: &Schema) {
        self.entries.extend(rhs.entries.iter().cloned());
    }
}

impl Add<&Schema> for &Schema {
    type Output = Schema;
    fn add(self, rhs: &Schema) -> Schema {
        let mut res = self.clone();
        res += rhs;
        res
    }
}

/// Union with identifier de-duplication.
impl BitOrAssign<&Schema> for Schema {
    fn bitor_assign(&mut self, rhs: &Schema) {
        for e in &rhs.entries {
            if !self.entries.iter().any(|s| s.id == e.id) {
                self.entries.push(e.clone());
            }
        }
    }
}

impl BitOr<&Schema> for &Schema {
    type Output = Schema;
    fn bitor(self, rhs: &Schema) -> Schema {
        let mut res = self.clone();
        res |= rhs;
        res
    }
}

/// Set equality: same identifiers on both sides, order ignored.
impl PartialEq for Schema {
    fn eq(&self, other: &Schema) -> bool {
        self.entries.iter().all(|e| other.has(&e.id))
            && other.entries.iter().all(|e| self.has(&e.id))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{[")?;
        for (i, e) in self.entries.iter().enumerate() {
            if i != 0 {
                write!(f, ",")?;
            }
            write!(f, " {} :{}", e.id, e.ty)?;
        }
        write!(f, " ]}}")
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :{}", self.id, self.ty)
    }
}
