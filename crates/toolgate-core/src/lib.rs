//! # Toolgate Core Library
//!
//! Domain logic, entities, and repository traits for Toolgate.
//!
//! ## Modules
//!
//! - `domain` - Core entities (BackendConfig, CredentialRecord, Tool)
//! - `error` - Typed error taxonomy shared across the workspace
//! - `repository` - Data access and collaborator traits

pub mod domain;
pub mod error;
pub mod repository;

// Re-export commonly used types
pub use domain::*;
pub use error::*;
pub use repository::*;
