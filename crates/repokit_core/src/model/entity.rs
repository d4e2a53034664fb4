//! Entity contracts shared by repositories and the view-model mapper.
//!
//! # Responsibility
//! - Define the identity-bearing handle every repository stores.
//! - Provide a type-erased view used by cascading saves and related lookups.
//!
//! # Invariants
//! - Entity identity is reference identity of the shared handle, never value
//!   equality of its fields.
//! - `UNASSIGNED_ID` means "not persisted yet".
//! - Erased accessors never panic on a busy `RefCell`; they report
//!   `FieldError::Borrowed` instead.

use crate::model::schema::{EntitySchema, FieldError, SchemaInfo};
use crate::model::value::Value;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Unified entity key.
pub type EntityId = i64;

/// Identifier value of an entity that was never saved.
pub const UNASSIGNED_ID: EntityId = 0;

/// Shared, mutable handle to one entity instance.
pub type EntityRef<T> = Rc<RefCell<T>>;

/// Type-erased entity handle.
pub type AnyEntityRef = Rc<dyn AnyEntity>;

/// Record type managed by repositories.
///
/// `Default` provides the blank instance returned by `Repository::create`.
pub trait Entity: Default + 'static {
    fn schema() -> &'static EntitySchema<Self>;
}

/// Wraps an entity value into a shared handle.
pub fn new_ref<T>(entity: T) -> EntityRef<T> {
    Rc::new(RefCell::new(entity))
}

/// Erases the static type of an entity handle.
pub fn erase<T: Entity>(entity: &EntityRef<T>) -> AnyEntityRef {
    Rc::clone(entity) as AnyEntityRef
}

/// Recovers a typed handle; `None` when the entity is of another type.
pub fn downcast_entity<T: Entity>(entity: &AnyEntityRef) -> Option<EntityRef<T>> {
    Rc::clone(entity).into_any().downcast::<RefCell<T>>().ok()
}

/// Reference identity check across erased handles.
pub fn same_entity(left: &AnyEntityRef, right: &AnyEntityRef) -> bool {
    Rc::as_ptr(left).cast::<()>() == Rc::as_ptr(right).cast::<()>()
}

/// Runtime descriptor of an entity type.
///
/// Holds a deferred schema accessor so it can be created while the schema
/// itself is still being built (self-referencing associations).
#[derive(Clone, Copy)]
pub struct EntityType {
    type_id: TypeId,
    info: fn() -> &'static dyn SchemaInfo,
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            info: schema_info::<T>,
        }
    }

    pub fn type_id(self) -> TypeId {
        self.type_id
    }

    pub fn name(self) -> &'static str {
        self.schema().name()
    }

    pub fn schema(self) -> &'static dyn SchemaInfo {
        (self.info)()
    }

    /// Case-insensitive storage key used by persistent stores.
    pub fn storage_key(self) -> String {
        self.name().to_ascii_lowercase()
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl Debug for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityType({})", self.name())
    }
}

fn schema_info<T: Entity>() -> &'static dyn SchemaInfo {
    T::schema()
}

/// Untyped access to one entity instance.
pub trait AnyEntity {
    fn entity_type(&self) -> EntityType;

    /// Current identifier, `None` when the type declares no identity field.
    fn id(&self) -> Result<Option<EntityId>, FieldError>;

    fn field_value(&self, name: &str) -> Result<Value, FieldError>;

    fn set_field_value(&self, name: &str, value: Value) -> Result<(), FieldError>;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Entity> AnyEntity for RefCell<T> {
    fn entity_type(&self) -> EntityType {
        EntityType::of::<T>()
    }

    fn id(&self) -> Result<Option<EntityId>, FieldError> {
        let schema = T::schema();
        let entity = self.try_borrow().map_err(|_| FieldError::Borrowed {
            entity: schema.name(),
        })?;
        Ok(schema.id_of(&entity))
    }

    fn field_value(&self, name: &str) -> Result<Value, FieldError> {
        let schema = T::schema();
        let entity = self.try_borrow().map_err(|_| FieldError::Borrowed {
            entity: schema.name(),
        })?;
        schema.read(&entity, name)
    }

    fn set_field_value(&self, name: &str, value: Value) -> Result<(), FieldError> {
        let schema = T::schema();
        let mut entity = self.try_borrow_mut().map_err(|_| FieldError::Borrowed {
            entity: schema.name(),
        })?;
        schema.write(&mut entity, name, value)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Debug for dyn AnyEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Never walk fields here: associations may form cycles.
        match self.id() {
            Ok(Some(id)) => write!(f, "{}#{id}", self.entity_type().name()),
            _ => write!(f, "{}#?", self.entity_type().name()),
        }
    }
}
