//! Flat namespace of shared helpers available to every handler.
//!
//! Function modules register values under a name; handlers fetch them back by
//! name and type. Names are unique across all modules.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{RegistryError, Result};

/// Name → shared value map.
#[derive(Clone, Default)]
pub struct FunctionNamespace {
    entries: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl FunctionNamespace {
    /// Empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `name`. Names must be unique.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> Result<()> {
        self.insert_arc(name, Arc::new(value))
    }

    /// Register an already shared value.
    pub fn insert_arc<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: Arc<T>) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateFunction(name));
        }
        let _ = self.entries.insert(name, value);
        Ok(())
    }

    /// Fetch `name` as `T`; `None` if absent or of another type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()?.downcast::<T>().ok()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the namespace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for FunctionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
