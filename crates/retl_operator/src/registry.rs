//! Operator registry.
//!
//! Maps definition names to operator factories and resource kinds to
//! resource factories. Lookups happen once, while the graph is built.

use crate::builtin::register_builtins;
use crate::trait_::{Operator, OperatorFactory, Resource, ResourceFactory};
use indexmap::IndexMap;
use retl_core::{RetlError, RetlResult, Value};
use std::sync::Arc;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Operator name already registered
    AlreadyRegistered {
        /// Offending name
        name: String,
    },
    /// Resource kind already registered
    ResourceAlreadyRegistered {
        /// Offending kind
        kind: String,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRegistered { name } => write!(f, "Operator already registered: {}", name),
            Self::ResourceAlreadyRegistered { kind } => {
                write!(f, "Resource kind already registered: {}", kind)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of operator and resource factories
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    /// Operator factories by name
    operators: IndexMap<String, Arc<dyn OperatorFactory>>,
    /// Resource factories by kind
    resources: IndexMap<String, Arc<dyn ResourceFactory>>,
}

impl OperatorRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every builtin operator
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Names are distinct constants, so this cannot collide on an empty registry
        if let Err(err) = register_builtins(&mut registry) {
            tracing::error!(error = %err, "Builtin registration collided");
        }
        registry
    }

    /// Register an operator factory
    ///
    /// # Errors
    ///
    /// Returns error if the name is already registered
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl OperatorFactory + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.operators.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        self.operators.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Register a resource factory
    ///
    /// # Errors
    ///
    /// Returns error if the kind is already registered
    pub fn register_resource(
        &mut self,
        kind: impl Into<String>,
        factory: impl ResourceFactory + 'static,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.resources.contains_key(&kind) {
            return Err(RegistryError::ResourceAlreadyRegistered { kind });
        }
        self.resources.insert(kind, Arc::new(factory));
        Ok(())
    }

    /// Build the operator registered under `name`
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperator` if nothing is registered under `name`,
    /// or the factory's error for a bad configuration
    pub fn build(&self, name: &str, config: &Value) -> RetlResult<Arc<dyn Operator>> {
        self.operators
            .get(name)
            .ok_or_else(|| RetlError::UnknownOperator {
                name: name.to_string(),
            })?
            .build(config)
    }

    /// Create a resource of the given kind
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperator` if the kind is not registered
    pub fn create_resource(&self, kind: &str, config: &Value) -> RetlResult<Arc<dyn Resource>> {
        self.resources
            .get(kind)
            .ok_or_else(|| RetlError::UnknownOperator {
                name: kind.to_string(),
            })?
            .create(config)
    }

    /// Check if an operator is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Check if a resource kind is registered
    #[must_use]
    pub fn contains_resource(&self, kind: &str) -> bool {
        self.resources.contains_key(kind)
    }

    /// Registered operator names
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.operators.keys().cloned().collect()
    }

    /// Registered resource kinds
    #[must_use]
    pub fn list_resources(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    /// Remove an operator
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperator` if it was not registered
    pub fn unregister(&mut self, name: &str) -> RetlResult<()> {
        self.operators
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| RetlError::UnknownOperator {
                name: name.to_string(),
            })
    }

    /// Number of registered operators
    #[must_use]
    pub fn count(&self) -> usize {
        self.operators.len()
    }

    /// Check if no operators are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
