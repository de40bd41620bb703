//! Component registry for the builder
//!
//! The registry is built per compile from the optimized programs and handed to
//! callers by value. There is no process-wide component table, so independent
//! compiler instances never observe each other's components.

use anyhow::{Result, anyhow};
use log::trace;

use crate::{analyzer::is_async_component, resolver::LoadedModule, types::FxIndexMap};

/// Where a component lives and how it should be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEntry {
    /// Graph key of the declaring file
    pub file: String,
    pub is_async: bool,
    /// Marked inlinable by the optimizer
    pub inline: bool,
}

/// Name → component lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentRegistry {
    components: FxIndexMap<String, ComponentEntry>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every component retained in `modules`
    ///
    /// When two files declare the same component name the first one wins.
    pub fn from_modules(modules: &[LoadedModule]) -> Self {
        let mut registry = Self::new();
        for module in modules {
            for component in &module.program.components {
                registry.register(
                    &component.name,
                    ComponentEntry {
                        file: module.key.clone(),
                        is_async: is_async_component(component),
                        inline: component.inline,
                    },
                );
            }
        }
        registry
    }

    /// Add a component unless the name is already taken; returns whether it was added
    pub fn register(&mut self, name: &str, entry: ComponentEntry) -> bool {
        if self.components.contains_key(name) {
            trace!(
                "Component '{name}' from '{}' shadowed by an earlier declaration",
                entry.file
            );
            return false;
        }
        self.components.insert(name.to_owned(), entry);
        true
    }

    /// Look up the factory location for `name`
    pub fn load_component(&self, name: &str) -> Result<&ComponentEntry> {
        self.components
            .get(name)
            .ok_or_else(|| anyhow!("Component '{name}' is not registered"))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
