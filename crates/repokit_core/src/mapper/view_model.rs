//! View-model contract and field mapping metadata.
//!
//! # Responsibility
//! - Describe view-model fields with typed accessors, like entity schemas.
//! - Attach rename and related-entity metadata to individual fields.
//!
//! # Invariants
//! - Field names are unique within one view-model schema, embedded fields
//!   included.
//! - Embedded view models contribute their fields with their metadata.

use crate::model::entity::{Entity, EntityType};
use crate::model::schema::{FieldDef, FieldError};
use crate::model::value::{FieldKind, FieldValue, Value};
use std::collections::HashSet;

/// Key field used by related mappings that do not name one.
pub const DEFAULT_RELATED_KEY: &str = "id";

/// Presentation-side record mapped onto entities.
pub trait ViewModel: Sized + 'static {
    fn schema() -> &'static ViewModelSchema<Self>;
}

/// Related-entity target of a view-model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedMapping {
    related_type: EntityType,
    key_field: &'static str,
}

impl RelatedMapping {
    pub fn related_type(&self) -> EntityType {
        self.related_type
    }

    pub fn key_field(&self) -> &'static str {
        self.key_field
    }
}

/// Mapping metadata of one view-model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mapping {
    entity_field: Option<&'static str>,
    related: Option<RelatedMapping>,
}

impl Mapping {
    /// Maps onto the entity field of the same name, when present.
    pub fn same() -> Self {
        Self::default()
    }

    /// Maps onto a differently named entity field.
    pub fn rename(entity_field: &'static str) -> Self {
        Self {
            entity_field: Some(entity_field),
            related: None,
        }
    }

    /// Reads and writes `key_field` of the `U` instance the entity field
    /// references, instead of the reference itself.
    pub fn related<U: Entity>(mut self, key_field: &'static str) -> Self {
        self.related = Some(RelatedMapping {
            related_type: EntityType::of::<U>(),
            key_field,
        });
        self
    }

    pub fn related_by_id<U: Entity>(self) -> Self {
        self.related::<U>(DEFAULT_RELATED_KEY)
    }

    /// Entity field name this mapping reads and writes.
    pub fn entity_field(&self, own_name: &'static str) -> &'static str {
        self.entity_field.unwrap_or(own_name)
    }

    pub fn related_mapping(&self) -> Option<RelatedMapping> {
        self.related
    }

    /// Whether the mapping was declared rather than implied by the name.
    pub fn is_explicit(&self) -> bool {
        self.entity_field.is_some() || self.related.is_some()
    }
}

/// One view-model field and its mapping metadata.
pub struct ViewModelField<V> {
    def: FieldDef<V>,
    mapping: Mapping,
}

impl<V: 'static> ViewModelField<V> {
    pub fn name(&self) -> &'static str {
        self.def.name()
    }

    pub fn kind(&self) -> FieldKind {
        self.def.kind()
    }

    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    pub fn read(&self, view_model: &V) -> Value {
        self.def.read(view_model)
    }

    pub fn write(
        &self,
        owner_name: &'static str,
        view_model: &mut V,
        value: Value,
    ) -> Result<(), FieldError> {
        self.def.write(owner_name, view_model, value)
    }
}

/// Ordered field list of one view-model type.
pub struct ViewModelSchema<V> {
    name: &'static str,
    fields: Vec<ViewModelField<V>>,
}

impl<V: 'static> ViewModelSchema<V> {
    pub fn builder(name: &'static str) -> ViewModelSchemaBuilder<V> {
        ViewModelSchemaBuilder {
            name,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[ViewModelField<V>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ViewModelField<V>> {
        self.fields.iter().find(|field| field.name() == name)
    }
}

pub struct ViewModelSchemaBuilder<V> {
    name: &'static str,
    fields: Vec<ViewModelField<V>>,
}

impl<V: 'static> ViewModelSchemaBuilder<V> {
    /// Declares a field mapped by name.
    pub fn field<F>(self, name: &'static str, get: fn(&V) -> &F, get_mut: fn(&mut V) -> &mut F) -> Self
    where
        F: FieldValue + 'static,
    {
        self.mapped(name, Mapping::same(), get, get_mut)
    }

    /// Declares a field with explicit mapping metadata.
    pub fn mapped<F>(
        mut self,
        name: &'static str,
        mapping: Mapping,
        get: fn(&V) -> &F,
        get_mut: fn(&mut V) -> &mut F,
    ) -> Self
    where
        F: FieldValue + 'static,
    {
        self.fields.push(ViewModelField {
            def: FieldDef::new(name, get, get_mut),
            mapping,
        });
        self
    }

    /// Inherits every field of the embedded view model `B`, metadata included.
    pub fn embed<B: ViewModel>(mut self, get: fn(&V) -> &B, get_mut: fn(&mut V) -> &mut B) -> Self {
        for inner in B::schema().fields() {
            self.fields.push(ViewModelField {
                def: FieldDef::project(&inner.def, get, get_mut),
                mapping: inner.mapping,
            });
        }
        self
    }

    /// Finalizes the schema.
    ///
    /// # Panics
    /// - When two fields share a name, including fields inherited by `embed`.
    pub fn build(self) -> ViewModelSchema<V> {
        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            assert!(
                seen.insert(field.name()),
                "view model `{}` declares field `{}` twice",
                self.name,
                field.name()
            );
        }

        ViewModelSchema {
            name: self.name,
            fields: self.fields,
        }
    }
}
