//! # dualdb Domain Model
//!
//! Entities persisted through the dualdb data-access layer. The table
//! definitions in [`schema`] are the single source of truth for the schema
//! migrator and the repositories built on top of the driver chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod schema;

// =============================================================================
// ERRORS
// =============================================================================

/// Validation errors raised when constructing domain entities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("todo name must not be empty")]
    EmptyName,

    #[error("todo id must not be empty")]
    EmptyId,
}

// =============================================================================
// TODO
// =============================================================================

/// A todo item. Names are unique across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Todo {
    /// Create a todo with a freshly generated id.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Create a todo with a caller-supplied id. Ids are immutable once stored.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Result<Self, DomainError> {
        let todo = Self {
            id: id.into(),
            name: name.into(),
            description: None,
        };
        todo.validate()?;
        Ok(todo)
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the field constraints enforced by the table definition.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::EmptyName);
        }
        Ok(())
    }
}
