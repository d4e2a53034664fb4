//! Type-indexed repository registry.
//!
//! # Responsibility
//! - Map an entity type to the repository responsible for it.
//! - Expose an untyped repository surface for cascades and related lookups.
//!
//! # Invariants
//! - At most one repository is registered per entity type.
//! - Lookups for unregistered types return `None`, never panic.

use crate::model::entity::{downcast_entity, erase, AnyEntityRef, Entity, EntityId, EntityType};
use crate::model::value::Value;
use crate::repo::{RepoError, RepoResult, Repository, SaveTransaction};
use log::info;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

/// Untyped repository surface, implemented once per registered entity type.
pub trait ErasedRepository {
    fn entity_type(&self) -> EntityType;

    /// Saves an erased entity inside an existing save transaction.
    fn save_erased(&self, entity: &AnyEntityRef, transaction: &mut SaveTransaction)
        -> RepoResult<()>;

    /// Returns the first stored entity whose `field` equals `value`.
    fn find_by_field(&self, field: &str, value: &Value) -> RepoResult<Option<AnyEntityRef>>;

    fn find_erased(&self, id: EntityId) -> RepoResult<Option<AnyEntityRef>>;

    fn create_erased(&self) -> AnyEntityRef;
}

struct ErasedAdapter<T, R: ?Sized> {
    repository: Rc<R>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R> ErasedRepository for ErasedAdapter<T, R>
where
    T: Entity,
    R: Repository<T> + ?Sized,
{
    fn entity_type(&self) -> EntityType {
        EntityType::of::<T>()
    }

    fn save_erased(
        &self,
        entity: &AnyEntityRef,
        transaction: &mut SaveTransaction,
    ) -> RepoResult<()> {
        let typed = downcast_entity::<T>(entity).ok_or_else(|| {
            RepoError::InvalidArgument(format!(
                "cannot save `{}` through the `{}` repository",
                entity.entity_type().name(),
                T::schema().name()
            ))
        })?;
        self.repository.save_in(&typed, transaction)
    }

    fn find_by_field(&self, field: &str, value: &Value) -> RepoResult<Option<AnyEntityRef>> {
        let schema = T::schema();
        if schema.field(field).is_none() {
            return Err(RepoError::InvalidArgument(format!(
                "`{}` has no field `{field}`",
                schema.name()
            )));
        }
        let found = self.repository.all_entities()?.where_field(field, value).first();
        Ok(found.as_ref().map(erase))
    }

    fn find_erased(&self, id: EntityId) -> RepoResult<Option<AnyEntityRef>> {
        let found = self.repository.find(id)?;
        Ok(found.as_ref().map(erase))
    }

    fn create_erased(&self) -> AnyEntityRef {
        erase(&self.repository.create())
    }
}

struct Registration {
    erased: Rc<dyn ErasedRepository>,
    // Holds an `Rc<dyn Repository<T>>` for the registered `T`.
    typed: Rc<dyn Any>,
}

/// Registry of repositories keyed by entity type.
///
/// Passed explicitly to the mapper and held weakly by repositories for
/// cascading saves; there is no process-wide instance.
#[derive(Default)]
pub struct RepositoryRegistry {
    registrations: RefCell<HashMap<TypeId, Registration>>,
}

impl RepositoryRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Registers the repository responsible for `T`.
    pub fn register<T, R>(&self, repository: Rc<R>) -> RepoResult<()>
    where
        T: Entity,
        R: Repository<T> + 'static,
    {
        let entity_type = EntityType::of::<T>();
        let mut registrations = self.registrations.borrow_mut();
        if registrations.contains_key(&entity_type.type_id()) {
            return Err(RepoError::AlreadyRegistered(entity_type.name()));
        }

        let typed: Rc<dyn Repository<T>> = repository.clone();
        let erased: Rc<dyn ErasedRepository> = Rc::new(ErasedAdapter::<T, R> {
            repository,
            _entity: PhantomData,
        });
        registrations.insert(
            entity_type.type_id(),
            Registration {
                erased,
                typed: Rc::new(typed),
            },
        );
        info!(
            "event=repository_register module=repo.registry status=ok entity={}",
            entity_type.name()
        );
        Ok(())
    }

    /// Returns the repository registered for `T`, if any.
    pub fn repository<T: Entity>(&self) -> Option<Rc<dyn Repository<T>>> {
        self.registrations
            .borrow()
            .get(&TypeId::of::<T>())
            .and_then(|registration| {
                registration
                    .typed
                    .downcast_ref::<Rc<dyn Repository<T>>>()
                    .cloned()
            })
    }

    /// Like `repository`, but reports a missing registration as an error.
    pub fn require<T: Entity>(&self) -> RepoResult<Rc<dyn Repository<T>>> {
        self.repository::<T>()
            .ok_or_else(|| RepoError::NotRegistered(T::schema().name()))
    }

    pub fn erased(&self, entity_type: EntityType) -> Option<Rc<dyn ErasedRepository>> {
        self.registrations
            .borrow()
            .get(&entity_type.type_id())
            .map(|registration| Rc::clone(&registration.erased))
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.registrations.borrow().contains_key(&TypeId::of::<T>())
    }

    /// Drops the registration for `T`; returns whether one existed.
    pub fn unregister<T: Entity>(&self) -> bool {
        self.registrations
            .borrow_mut()
            .remove(&TypeId::of::<T>())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.registrations.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.borrow().is_empty()
    }

    /// Registered entity type names, sorted.
    pub fn entity_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .registrations
            .borrow()
            .values()
            .map(|registration| registration.erased.entity_type().name())
            .collect();
        names.sort_unstable();
        names
    }
}
