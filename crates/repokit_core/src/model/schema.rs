//! Declarative field schemas replacing runtime reflection.
//!
//! # Responsibility
//! - Describe the readable/writable fields of a record type once per type.
//! - Expose typed accessor pairs behind untyped `Value` read/write.
//! - Enumerate association targets for cascading saves.
//!
//! # Invariants
//! - Field names are unique within one schema.
//! - At most one field is the identity field, and it is an integer field.
//! - Schemas are immutable after `build()`.

use crate::model::entity::{AnyEntityRef, EntityId};
use crate::model::value::{FieldKind, FieldValue, TypeMismatch, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

type Reader<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type Writer<T> = Box<dyn Fn(&mut T, Value) -> Result<(), TypeMismatch> + Send + Sync>;

/// Field-level access error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnknownField {
        owner: &'static str,
        field: String,
    },
    TypeMismatch {
        owner: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// The entity is mutably borrowed elsewhere.
    Borrowed { entity: &'static str },
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { owner, field } => write!(f, "`{owner}` has no field `{field}`"),
            Self::TypeMismatch {
                owner,
                field,
                expected,
                found,
            } => write!(
                f,
                "field `{owner}.{field}` expects {expected}, got {found}"
            ),
            Self::Borrowed { entity } => {
                write!(f, "`{entity}` instance is already mutably borrowed")
            }
        }
    }
}

impl Error for FieldError {}

/// One named field with typed accessors hidden behind `Value`.
pub struct FieldDef<T> {
    name: &'static str,
    kind: FieldKind,
    read: Reader<T>,
    write: Writer<T>,
}

impl<T: 'static> FieldDef<T> {
    pub fn new<F>(name: &'static str, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self
    where
        F: FieldValue + 'static,
    {
        Self {
            name,
            kind: F::kind(),
            read: Box::new(move |owner: &T| get(owner).to_value()),
            write: Box::new(move |owner: &mut T, value: Value| {
                *get_mut(owner) = F::from_value(value)?;
                Ok(())
            }),
        }
    }

    /// Lifts a field of an embedded record `B` into the outer record `T`.
    pub fn project<B: 'static>(
        inner: &'static FieldDef<B>,
        get: fn(&T) -> &B,
        get_mut: fn(&mut T) -> &mut B,
    ) -> Self {
        Self {
            name: inner.name,
            kind: inner.kind,
            read: Box::new(move |owner: &T| inner.read(get(owner))),
            write: Box::new(move |owner: &mut T, value: Value| (inner.write)(get_mut(owner), value)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn read(&self, owner: &T) -> Value {
        (self.read)(owner)
    }

    /// Writes a value, attributing mismatches to `owner_name`.
    pub fn write(
        &self,
        owner_name: &'static str,
        owner: &mut T,
        value: Value,
    ) -> Result<(), FieldError> {
        (self.write)(owner, value).map_err(|mismatch| FieldError::TypeMismatch {
            owner: owner_name,
            field: self.name,
            expected: mismatch.expected,
            found: mismatch.found,
        })
    }
}

/// Object-safe summary of an entity schema.
pub trait SchemaInfo: Sync {
    fn name(&self) -> &'static str;
    fn field_kind(&self, name: &str) -> Option<FieldKind>;
    fn field_names(&self) -> Vec<&'static str>;
    fn identity_field(&self) -> Option<&'static str>;
}

/// Ordered field list of one entity type.
pub struct EntitySchema<T> {
    name: &'static str,
    fields: Vec<FieldDef<T>>,
    index: HashMap<&'static str, usize>,
    identity: Option<usize>,
}

impl<T: 'static> EntitySchema<T> {
    pub fn builder(name: &'static str) -> EntitySchemaBuilder<T> {
        EntitySchemaBuilder {
            name,
            fields: Vec::new(),
            identity: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDef<T>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef<T>> {
        self.index.get(name).map(|position| &self.fields[*position])
    }

    pub fn field_ignore_case(&self, name: &str) -> Option<&FieldDef<T>> {
        self.position_ignore_case(name)
            .map(|position| &self.fields[position])
    }

    /// Position of `name`, preferring an exact match over a case-insensitive one.
    pub fn position_ignore_case(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied().or_else(|| {
            self.fields
                .iter()
                .position(|field| field.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn identity(&self) -> Option<&FieldDef<T>> {
        self.identity.map(|position| &self.fields[position])
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Reads the identifier; `None` for types without an identity field.
    pub fn id_of(&self, entity: &T) -> Option<EntityId> {
        self.identity()
            .and_then(|field| field.read(entity).as_integer())
    }

    /// Stamps an identifier; no-op for types without an identity field.
    pub fn assign_id(&self, entity: &mut T, id: EntityId) -> Result<(), FieldError> {
        match self.identity() {
            Some(field) => field.write(self.name, entity, Value::Integer(id)),
            None => Ok(()),
        }
    }

    pub fn read(&self, entity: &T, name: &str) -> Result<Value, FieldError> {
        self.field(name)
            .map(|field| field.read(entity))
            .ok_or_else(|| self.unknown(name))
    }

    pub fn write(&self, entity: &mut T, name: &str, value: Value) -> Result<(), FieldError> {
        let field = self.field(name).ok_or_else(|| self.unknown(name))?;
        field.write(self.name, entity, value)
    }

    /// Collects every directly referenced entity whose type has an identity
    /// field: non-null to-one values and elements of to-many collections.
    pub fn associations(&self, entity: &T) -> Vec<AnyEntityRef> {
        let mut related = Vec::new();
        for field in self.fields.iter().filter(|field| field.kind.is_association()) {
            match field.read(entity) {
                Value::Entity(target) => related.push(target),
                Value::Entities(targets) => related.extend(targets),
                _ => {}
            }
        }
        related.retain(|target| target.entity_type().schema().identity_field().is_some());
        related
    }

    /// Overwrites every field of `target` with the value held by `source`.
    pub fn copy_fields(&self, source: &T, target: &mut T) -> Result<(), FieldError> {
        for field in &self.fields {
            field.write(self.name, target, field.read(source))?;
        }
        Ok(())
    }

    fn unknown(&self, name: &str) -> FieldError {
        FieldError::UnknownField {
            owner: self.name,
            field: name.to_string(),
        }
    }
}

impl<T: 'static> SchemaInfo for EntitySchema<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.field(name).map(FieldDef::kind)
    }

    fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(FieldDef::name).collect()
    }

    fn identity_field(&self) -> Option<&'static str> {
        self.identity().map(FieldDef::name)
    }
}

/// Builder for `EntitySchema`.
pub struct EntitySchemaBuilder<T> {
    name: &'static str,
    fields: Vec<FieldDef<T>>,
    identity: Option<usize>,
}

impl<T: 'static> EntitySchemaBuilder<T> {
    /// Declares the identity field.
    pub fn identity(
        mut self,
        name: &'static str,
        get: fn(&T) -> &EntityId,
        get_mut: fn(&mut T) -> &mut EntityId,
    ) -> Self {
        self.identity = Some(self.fields.len());
        self.fields.push(FieldDef::new(name, get, get_mut));
        self
    }

    pub fn field<F>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self
    where
        F: FieldValue + 'static,
    {
        self.fields.push(FieldDef::new(name, get, get_mut));
        self
    }

    /// Finalizes the schema.
    ///
    /// # Panics
    /// - When two fields share a name. Schemas are static declarations, so
    ///   this surfaces on first use of the type.
    pub fn build(self) -> EntitySchema<T> {
        let mut index = HashMap::with_capacity(self.fields.len());
        for (position, field) in self.fields.iter().enumerate() {
            let previous = index.insert(field.name, position);
            assert!(
                previous.is_none(),
                "schema `{}` declares field `{}` twice",
                self.name,
                field.name
            );
        }

        EntitySchema {
            name: self.name,
            fields: self.fields,
            index,
            identity: self.identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySchema, FieldError, SchemaInfo};
    use crate::model::value::{FieldKind, Value};

    #[derive(Default)]
    struct Label {
        id: i64,
        text: String,
        weight: Option<i32>,
    }

    fn schema() -> EntitySchema<Label> {
        EntitySchema::<Label>::builder("Label")
            .identity("id", |label| &label.id, |label| &mut label.id)
            .field("text", |label| &label.text, |label| &mut label.text)
            .field("weight", |label| &label.weight, |label| &mut label.weight)
            .build()
    }

    #[test]
    fn read_and_write_go_through_typed_accessors() {
        let schema = schema();
        let mut label = Label::default();

        schema
            .write(&mut label, "text", Value::from("urgent"))
            .unwrap();
        schema.write(&mut label, "weight", Value::Integer(3)).unwrap();

        assert_eq!(label.text, "urgent");
        assert_eq!(label.weight, Some(3));
        assert_eq!(schema.read(&label, "weight").unwrap(), Value::Integer(3));
    }

    #[test]
    fn identity_is_assigned_and_read_back() {
        let schema = schema();
        let mut label = Label::default();

        schema.assign_id(&mut label, 9).unwrap();
        assert_eq!(schema.id_of(&label), Some(9));
        assert_eq!(schema.identity_field(), Some("id"));
    }

    #[test]
    fn unknown_field_and_mismatch_are_reported() {
        let schema = schema();
        let mut label = Label::default();

        let unknown = schema.read(&label, "color").unwrap_err();
        assert!(matches!(unknown, FieldError::UnknownField { .. }));

        let mismatch = schema
            .write(&mut label, "text", Value::Integer(1))
            .unwrap_err();
        assert_eq!(
            mismatch,
            FieldError::TypeMismatch {
                owner: "Label",
                field: "text",
                expected: "text",
                found: "integer",
            }
        );
    }

    #[test]
    fn case_insensitive_lookup_falls_back_to_scan() {
        let schema = schema();
        assert_eq!(schema.field_ignore_case("TEXT").map(|f| f.name()), Some("text"));
        assert_eq!(schema.field_kind("weight"), Some(FieldKind::Scalar));
    }

    #[test]
    #[should_panic(expected = "declares field `text` twice")]
    fn duplicate_field_names_fail_fast() {
        let _ = EntitySchema::<Label>::builder("Label")
            .field("text", |label| &label.text, |label| &mut label.text)
            .field("text", |label| &label.text, |label| &mut label.text)
            .build();
    }
}
