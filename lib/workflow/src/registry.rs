//! The node type registry.
//!
//! Maps type identifiers to their [`NodeTypeDefinition`]. Built once at
//! process start and read-only afterwards; share it behind an `Arc`.

use crate::error::RegistryError;
use crate::node_type::{BUILTIN, BUILTIN_ALIASES, NodeCategory, NodeTypeDefinition};
use std::collections::{BTreeMap, HashMap};

/// Catalog of known node types.
#[derive(Debug, Clone)]
pub struct NodeTypeRegistry {
    definitions: HashMap<&'static str, NodeTypeDefinition>,
    aliases: HashMap<&'static str, &'static str>,
}

impl NodeTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            definitions: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Creates a registry holding the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for definition in BUILTIN {
            registry.definitions.insert(definition.id, definition.clone());
        }
        for (alias, target) in BUILTIN_ALIASES {
            registry.aliases.insert(alias, target);
        }
        registry
    }

    /// Registers an additional node type.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is already taken by a type or alias.
    pub fn register(&mut self, definition: NodeTypeDefinition) -> Result<(), RegistryError> {
        if self.contains(definition.id) {
            return Err(RegistryError::DuplicateType {
                node_type: definition.id.to_string(),
            });
        }
        self.definitions.insert(definition.id, definition);
        Ok(())
    }

    /// Registers an alternative identifier for an existing type.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown or the alias is taken.
    pub fn register_alias(
        &mut self,
        alias: &'static str,
        target: &'static str,
    ) -> Result<(), RegistryError> {
        if self.contains(alias) {
            return Err(RegistryError::DuplicateType {
                node_type: alias.to_string(),
            });
        }
        if !self.definitions.contains_key(target) {
            return Err(RegistryError::NotFound {
                node_type: target.to_string(),
            });
        }
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// Looks up a node type by identifier or alias.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown identifiers.
    pub fn lookup(&self, node_type: &str) -> Result<&NodeTypeDefinition, RegistryError> {
        let canonical = self.aliases.get(node_type).copied().unwrap_or(node_type);
        self.definitions
            .get(canonical)
            .ok_or_else(|| RegistryError::NotFound {
                node_type: node_type.to_string(),
            })
    }

    /// Resolves an alias to its canonical identifier.
    #[must_use]
    pub fn canonical<'a>(&'a self, node_type: &'a str) -> &'a str {
        self.aliases.get(node_type).copied().unwrap_or(node_type)
    }

    /// Returns true if the identifier or alias is known.
    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.definitions.contains_key(node_type) || self.aliases.contains_key(node_type)
    }

    /// Returns the definitions in a category, sorted by identifier.
    #[must_use]
    pub fn by_category(&self, category: NodeCategory) -> Vec<&NodeTypeDefinition> {
        let mut definitions: Vec<_> = self
            .definitions
            .values()
            .filter(|d| d.category == category)
            .collect();
        definitions.sort_by_key(|d| d.id);
        definitions
    }

    /// Returns the palette: every non-empty category with its definitions.
    #[must_use]
    pub fn palette(&self) -> BTreeMap<NodeCategory, Vec<&NodeTypeDefinition>> {
        NodeCategory::ALL
            .into_iter()
            .map(|category| (category, self.by_category(category)))
            .filter(|(_, definitions)| !definitions.is_empty())
            .collect()
    }

    /// Iterates over all definitions in no particular order.
    pub fn definitions(&self) -> impl Iterator<Item = &NodeTypeDefinition> {
        self.definitions.values()
    }

    /// Number of registered types, excluding aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
