//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the generic repository contract every store implements.
//! - Own the save transaction that guards cascading saves against cycles.
//! - Provide the type-indexed registry used to reach related repositories.
//!
//! # Invariants
//! - A cascading save visits each entity instance at most once per root call.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidArgument`) in
//!   addition to storage transport errors.
//! - Removing an entity never cascades to the entities it references.

pub mod memory_repo;
pub mod registry;
pub mod sqlite_repo;

use crate::db::DbError;
use crate::model::entity::{
    downcast_entity, erase, new_ref, AnyEntityRef, Entity, EntityId, EntityRef, EntityType,
};
use crate::model::schema::FieldError;
use crate::model::value::Value;
use by_address::ByThinAddress;
use log::debug;
use registry::RepositoryRegistry;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// The argument cannot be stored (wrong entity type, malformed input).
    InvalidArgument(String),
    /// No stored entity shares the identifier of the target.
    NotFound {
        entity: &'static str,
        id: Option<EntityId>,
    },
    /// The entity type declares no identity field, so it cannot be looked up.
    MissingIdentity(&'static str),
    /// No repository is registered for a required entity type.
    NotRegistered(&'static str),
    /// A repository for this entity type is already registered.
    AlreadyRegistered(&'static str),
    /// The entity instance is mutably borrowed by the caller.
    EntityBorrowed(&'static str),
    /// The repository was disposed.
    Disposed(&'static str),
    Field(FieldError),
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::NotFound {
                entity,
                id: Some(id),
            } => write!(f, "{entity} not found: {id}"),
            Self::NotFound { entity, id: None } => {
                write!(f, "{entity} not found: identifier is unset")
            }
            Self::MissingIdentity(entity) => {
                write!(f, "entity type `{entity}` has no identity field")
            }
            Self::NotRegistered(entity) => {
                write!(f, "no repository registered for `{entity}`")
            }
            Self::AlreadyRegistered(entity) => {
                write!(f, "repository already registered for `{entity}`")
            }
            Self::EntityBorrowed(entity) => {
                write!(f, "`{entity}` instance is borrowed and cannot be saved")
            }
            Self::Disposed(entity) => write!(f, "repository for `{entity}` is disposed"),
            Self::Field(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Field(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FieldError> for RepoError {
    fn from(value: FieldError) -> Self {
        match value {
            FieldError::Borrowed { entity } => Self::EntityBorrowed(entity),
            other => Self::Field(other),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Set of entity instances currently being saved by one root `save` call.
///
/// Created by the root call and threaded through every cascaded save, across
/// repositories of different entity types. Dropping it ends the transaction.
#[derive(Default)]
pub struct SaveTransaction {
    in_progress: HashSet<ByThinAddress<AnyEntityRef>>,
}

impl SaveTransaction {
    pub fn begin() -> Self {
        Self::default()
    }

    /// Marks an entity as being saved.
    ///
    /// Returns `false` when the same instance is already part of this
    /// transaction; the caller must then stop descending.
    pub fn enter(&mut self, entity: &AnyEntityRef) -> bool {
        self.in_progress.insert(ByThinAddress(Rc::clone(entity)))
    }

    pub fn contains(&self, entity: &AnyEntityRef) -> bool {
        self.in_progress.contains(&ByThinAddress(Rc::clone(entity)))
    }

    pub fn len(&self) -> usize {
        self.in_progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.is_empty()
    }
}

/// Restartable snapshot of the entities visible to a repository.
pub struct Query<T> {
    entities: Vec<EntityRef<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
        }
    }
}

impl<T: Entity> Query<T> {
    pub fn new(entities: Vec<EntityRef<T>>) -> Self {
        Self { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef<T>> {
        self.entities.iter()
    }

    pub fn first(&self) -> Option<EntityRef<T>> {
        self.entities.first().cloned()
    }

    /// Keeps entities matching `predicate`.
    ///
    /// Entities mutably borrowed elsewhere cannot be inspected and are left out.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Self {
        let entities = self
            .entities
            .iter()
            .filter(|entity| {
                entity
                    .try_borrow()
                    .map(|entity| predicate(&*entity))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Self { entities }
    }

    /// Keeps entities whose field `name` equals `value`.
    pub fn where_field(&self, name: &str, value: &Value) -> Self {
        let schema = T::schema();
        self.filter(|entity| {
            schema
                .read(entity, name)
                .map(|current| current == *value)
                .unwrap_or(false)
        })
    }

    pub fn find_by_id(&self, id: EntityId) -> Option<EntityRef<T>> {
        let schema = T::schema();
        self.entities
            .iter()
            .find(|entity| {
                entity
                    .try_borrow()
                    .map(|entity| schema.id_of(&entity) == Some(id))
                    .unwrap_or(false)
            })
            .cloned()
    }

    pub fn contains(&self, entity: &EntityRef<T>) -> bool {
        self.entities.iter().any(|stored| Rc::ptr_eq(stored, entity))
    }

    pub fn into_vec(self) -> Vec<EntityRef<T>> {
        self.entities
    }
}

impl<T> IntoIterator for Query<T> {
    type Item = EntityRef<T>;
    type IntoIter = std::vec::IntoIter<EntityRef<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Query<T> {
    type Item = &'a EntityRef<T>;
    type IntoIter = std::slice::Iter<'a, EntityRef<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

/// Repository interface for one entity type.
pub trait Repository<T: Entity> {
    /// Full extent currently visible to this repository, in store order.
    fn all_entities(&self) -> RepoResult<Query<T>>;

    /// Looks up one entity by identifier.
    fn find(&self, id: EntityId) -> RepoResult<Option<EntityRef<T>>> {
        Ok(self.all_entities()?.find_by_id(id))
    }

    /// Returns a new, unsaved instance.
    fn create(&self) -> EntityRef<T> {
        new_ref(T::default())
    }

    /// Upserts `entity` and cascades to every entity reachable from it.
    ///
    /// Starts a fresh save transaction; re-saving an already stored instance
    /// never duplicates it nor changes its identifier.
    fn save(&self, entity: &EntityRef<T>) -> RepoResult<()> {
        let mut transaction = SaveTransaction::begin();
        self.save_in(entity, &mut transaction)
    }

    /// Saves `entity` as part of an existing save transaction.
    fn save_in(&self, entity: &EntityRef<T>, transaction: &mut SaveTransaction) -> RepoResult<()>;

    /// Saves each entity as its own root call.
    fn save_all(&self, entities: &[EntityRef<T>]) -> RepoResult<()> {
        for entity in entities {
            self.save(entity)?;
        }
        Ok(())
    }

    /// Deletes `entity`; removing an entity that is not stored is a no-op.
    fn remove(&self, entity: &EntityRef<T>) -> RepoResult<()>;

    /// Reloads the stored field values into the caller's instance.
    fn update(&self, entity: &EntityRef<T>) -> RepoResult<()>;

    /// Releases backing resources. Later calls fail with `Disposed`.
    fn dispose(&self) -> RepoResult<()>;
}

/// Saves one referenced entity inside `transaction`.
///
/// Same-type references are saved through `owner` itself; other types go
/// through the registry. A type without a registered repository is skipped.
pub(crate) fn cascade_save<T, R>(
    owner: &R,
    locator: &Weak<RepositoryRegistry>,
    related: &AnyEntityRef,
    transaction: &mut SaveTransaction,
) -> RepoResult<()>
where
    T: Entity,
    R: Repository<T> + ?Sized,
{
    let related_type = related.entity_type();
    if related_type == EntityType::of::<T>() {
        let typed = downcast_entity::<T>(related).ok_or_else(|| {
            RepoError::InvalidArgument(format!(
                "value is not a `{}` entity",
                related_type.name()
            ))
        })?;
        return owner.save_in(&typed, transaction);
    }

    match locator
        .upgrade()
        .and_then(|registry| registry.erased(related_type))
    {
        Some(repository) => repository.save_erased(related, transaction),
        None => {
            debug!(
                "event=cascade_skip module=repo status=skip owner={} related={} reason=not_registered",
                T::schema().name(),
                related_type.name()
            );
            Ok(())
        }
    }
}

/// Reads the associations of `entity` without holding the borrow afterwards.
pub(crate) fn collect_associations<T: Entity>(
    entity: &EntityRef<T>,
) -> RepoResult<Vec<AnyEntityRef>> {
    let schema = T::schema();
    let guard = entity
        .try_borrow()
        .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
    Ok(schema.associations(&guard))
}

/// Reads the identifier of a typed entity handle.
pub(crate) fn read_id<T: Entity>(entity: &EntityRef<T>) -> RepoResult<Option<EntityId>> {
    Ok(erase(entity).id()?)
}
