//! Name tables for argument and field declarations.
//!
//! Descriptors are declared unnamed and receive their name when they are
//! registered into the owning schema's table. The table is built once, when
//! the endpoint or resource is built, and is read-only afterwards.
//! Registration moves each descriptor into its table, so a descriptor can
//! never be shared by two schemas.

use std::collections::HashMap;

use crate::error::SchemaError;

/// Names starting with this character are reserved for internal state.
pub const RESERVED_PREFIX: char = '_';

/// Something that can be registered into a [`SchemaTable`].
pub trait Descriptor {
    /// The registered name, empty until registration.
    fn name(&self) -> &str;

    /// Assign the registered name. Called exactly once, by the registrar.
    fn bind_name(&mut self, name: String);

    /// Check declaration-level constraints once the name is known.
    fn verify(&self, owner: &str) -> Result<(), SchemaError> {
        let _ = owner;
        Ok(())
    }
}

/// Frozen, ordered name -> descriptor table.
#[derive(Debug, Clone)]
pub struct SchemaTable<D> {
    entries: Vec<D>,
    index: HashMap<String, usize>,
}

impl<D> Default for SchemaTable<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<D: Descriptor> SchemaTable<D> {
    /// Register every `(name, descriptor)` pair for the schema named `owner`.
    ///
    /// # Errors
    ///
    /// Fails on the first reserved, empty, duplicate or otherwise invalid
    /// declaration; nothing is partially registered in that case.
    pub fn register<I>(owner: &str, declared: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (String, D)>,
    {
        let mut table = Self::default();
        for (name, mut descriptor) in declared {
            if name.is_empty() {
                return Err(SchemaError::EmptyName {
                    owner: owner.to_string(),
                });
            }
            if name.starts_with(RESERVED_PREFIX) {
                return Err(SchemaError::ReservedName {
                    owner: owner.to_string(),
                    name,
                });
            }
            if table.index.contains_key(&name) {
                return Err(SchemaError::DuplicateName {
                    owner: owner.to_string(),
                    name,
                });
            }
            descriptor.bind_name(name.clone());
            descriptor.verify(owner)?;
            table.index.insert(name, table.entries.len());
            table.entries.push(descriptor);
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&D> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, D> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, D> IntoIterator for &'a SchemaTable<D> {
    type Item = &'a D;
    type IntoIter = std::slice::Iter<'a, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
