//! View-model ↔ entity property mapping.
//!
//! # Responsibility
//! - Declare how view-model fields map onto entity fields (same name,
//!   rename, related-entity key).
//! - Copy values in both directions through validated mapping plans.
//!
//! # Invariants
//! - A plan is validated once per `(view model, entity)` pair before use.
//! - Null source values are skipped, never written as explicit nulls.

pub mod plan;
pub mod view_model;

use crate::model::schema::FieldError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use plan::{fill_from_entity, update_entity_from_view_model, MappingPlan};
pub use view_model::{
    Mapping, RelatedMapping, ViewModel, ViewModelField, ViewModelSchema, DEFAULT_RELATED_KEY,
};

pub type MapResult<T> = Result<T, MapError>;

/// Mapping plan validation and execution error.
#[derive(Debug)]
pub enum MapError {
    /// An explicit mapping names an entity field that does not exist.
    UnknownEntityField {
        view_model: &'static str,
        entity: &'static str,
        field: &'static str,
    },
    /// A related-entity mapping targets a field that is not a to-one reference.
    NotAnAssociation {
        view_model: &'static str,
        field: &'static str,
        entity_field: &'static str,
    },
    RelatedTypeMismatch {
        view_model: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// The related type has no field named by the related key.
    UnknownRelatedField {
        related: &'static str,
        field: &'static str,
    },
    /// View-model and entity fields differ in kind (scalar vs association).
    IncompatibleField {
        view_model: &'static str,
        field: &'static str,
        entity_field: &'static str,
    },
    /// A required collaborator (related repository) is not configured.
    Configuration(String),
    Field(FieldError),
    Repo(RepoError),
}

impl Display for MapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntityField {
                view_model,
                entity,
                field,
            } => write!(f, "`{view_model}` maps to unknown field `{entity}.{field}`"),
            Self::NotAnAssociation {
                view_model,
                field,
                entity_field,
            } => write!(
                f,
                "`{view_model}.{field}` is a related mapping but `{entity_field}` is not a to-one reference"
            ),
            Self::RelatedTypeMismatch {
                view_model,
                field,
                expected,
                found,
            } => write!(
                f,
                "`{view_model}.{field}` expects related type `{expected}`, entity field references `{found}`"
            ),
            Self::UnknownRelatedField { related, field } => {
                write!(f, "related type `{related}` has no scalar field `{field}`")
            }
            Self::IncompatibleField {
                view_model,
                field,
                entity_field,
            } => write!(
                f,
                "`{view_model}.{field}` and entity field `{entity_field}` differ in kind"
            ),
            Self::Configuration(message) => write!(f, "mapper configuration error: {message}"),
            Self::Field(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Field(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FieldError> for MapError {
    fn from(value: FieldError) -> Self {
        Self::Field(value)
    }
}

impl From<RepoError> for MapError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
