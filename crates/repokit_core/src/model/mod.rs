//! Entity model contracts and declarative schemas.
//!
//! # Responsibility
//! - Define the entity handle, identity and type-erased access.
//! - Replace runtime reflection with per-type field schemas built once.
//!
//! # Invariants
//! - Every stored entity is addressed by reference identity.
//! - Field kinds (scalar, to-one, to-many) are decided by Rust field types.

pub mod entity;
pub mod schema;
pub mod value;
