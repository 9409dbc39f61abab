//! `millstock-core`: record and schema foundation shared by every screen.
//!
//! This crate contains **pure data** primitives (no IO, no HTTP, no storage):
//! the generic `Record` container, identifiers, per-resource field schemas and
//! the domain error model.

pub mod error;
pub mod id;
pub mod record;
pub mod resource;

pub use error::{DomainError, DomainResult};
pub use id::{LocalId, RecordId};
pub use record::{FieldValue, Record};
pub use resource::{FieldKind, FieldSpec, ResourceKind, Schema};
