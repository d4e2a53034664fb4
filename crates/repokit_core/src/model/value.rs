//! Untyped field values and typed conversions.
//!
//! # Responsibility
//! - Carry one field value across schema boundaries without knowing its type.
//! - Convert between concrete Rust field types and `Value`.
//!
//! # Invariants
//! - Entity variants compare by reference identity, never by field contents.
//! - The field kind of a Rust type is decided at compile time by `FieldValue::kind`.

use crate::model::entity::{
    downcast_entity, erase, same_entity, AnyEntityRef, Entity, EntityRef, EntityType,
};
use std::fmt::{Debug, Formatter};

/// Structural role of a field inside an entity or view model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain data copied by value.
    Scalar,
    /// Reference to one entity of the given type.
    ToOne(EntityType),
    /// Collection of references to entities of the given type.
    ToMany(EntityType),
}

impl FieldKind {
    /// Returns the referenced entity type for association kinds.
    pub fn related_type(self) -> Option<EntityType> {
        match self {
            Self::Scalar => None,
            Self::ToOne(entity_type) | Self::ToMany(entity_type) => Some(entity_type),
        }
    }

    pub fn is_association(self) -> bool {
        !matches!(self, Self::Scalar)
    }
}

/// Untyped field value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Entity(AnyEntityRef),
    Entities(Vec<AnyEntityRef>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type label used in mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Entity(_) => "entity",
            Self::Entities(_) => "entities",
        }
    }

    pub fn as_entity(&self) -> Option<&AnyEntityRef> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Integer(left), Self::Integer(right)) => left == right,
            (Self::Real(left), Self::Real(right)) => left == right,
            (Self::Text(left), Self::Text(right)) => left == right,
            (Self::Entity(left), Self::Entity(right)) => same_entity(left, right),
            (Self::Entities(left), Self::Entities(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right.iter())
                        .all(|(left, right)| same_entity(left, right))
            }
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(value) => write!(f, "Bool({value})"),
            Self::Integer(value) => write!(f, "Integer({value})"),
            Self::Real(value) => write!(f, "Real({value})"),
            Self::Text(value) => write!(f, "Text({value:?})"),
            Self::Entity(entity) => write!(f, "Entity({entity:?})"),
            Self::Entities(entities) => f.debug_list().entries(entities.iter()).finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Conversion failure between `Value` and a concrete field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatch {
    pub expected: &'static str,
    pub found: &'static str,
}

impl TypeMismatch {
    fn new(expected: &'static str, found: &Value) -> Self {
        Self {
            expected,
            found: found.kind_name(),
        }
    }
}

/// Rust types that can be declared as schema fields.
pub trait FieldValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, TypeMismatch>;

    fn kind() -> FieldKind {
        FieldKind::Scalar
    }
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Bool(value) => Ok(value),
            other => Err(TypeMismatch::new("bool", &other)),
        }
    }
}

impl FieldValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Integer(value) => Ok(value),
            other => Err(TypeMismatch::new("integer", &other)),
        }
    }
}

impl FieldValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Integer(wide) => {
                i32::try_from(wide).map_err(|_| TypeMismatch::new("i32", &Value::Integer(wide)))
            }
            other => Err(TypeMismatch::new("i32", &other)),
        }
    }
}

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Real(value) => Ok(value),
            // Persisted JSON may narrow whole reals to integers.
            Value::Integer(value) => Ok(value as f64),
            other => Err(TypeMismatch::new("real", &other)),
        }
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Text(value) => Ok(value),
            other => Err(TypeMismatch::new("text", &other)),
        }
    }
}

impl<X: FieldValue> FieldValue for Option<X> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Null => Ok(None),
            other => X::from_value(other).map(Some),
        }
    }

    fn kind() -> FieldKind {
        X::kind()
    }
}

impl<U: Entity> FieldValue for EntityRef<U> {
    fn to_value(&self) -> Value {
        Value::Entity(erase(self))
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Entity(entity) => downcast_entity::<U>(&entity)
                .ok_or_else(|| TypeMismatch::new(U::schema().name(), &Value::Entity(entity))),
            other => Err(TypeMismatch::new(U::schema().name(), &other)),
        }
    }

    fn kind() -> FieldKind {
        FieldKind::ToOne(EntityType::of::<U>())
    }
}

impl<U: Entity> FieldValue for Vec<EntityRef<U>> {
    fn to_value(&self) -> Value {
        Value::Entities(self.iter().map(erase).collect())
    }

    fn from_value(value: Value) -> Result<Self, TypeMismatch> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Entities(entities) => entities
                .into_iter()
                .map(|entity| {
                    downcast_entity::<U>(&entity)
                        .ok_or_else(|| TypeMismatch::new(U::schema().name(), &Value::Entity(entity)))
                })
                .collect(),
            other => Err(TypeMismatch::new(U::schema().name(), &other)),
        }
    }

    fn kind() -> FieldKind {
        FieldKind::ToMany(EntityType::of::<U>())
    }
}
