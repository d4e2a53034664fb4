//! In-memory repository used as the reference store and in tests.
//!
//! # Responsibility
//! - Keep entities in insertion order and assign identifiers on first save.
//! - Cascade saves through associations, guarded by the save transaction.
//!
//! # Invariants
//! - Stored entities are distinct instances (reference identity).
//! - A new entity receives `max(stored ids) + 1`, or `1` when empty.
//! - Types without an identity field are stored without id assignment.
//! - No rollback: a failing cascade leaves earlier steps applied.

use crate::model::entity::{erase, Entity, EntityId, EntityRef};
use crate::repo::registry::RepositoryRegistry;
use crate::repo::{
    cascade_save, collect_associations, read_id, Query, RepoError, RepoResult, Repository,
    SaveTransaction,
};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Repository over an ordered in-memory buffer.
pub struct InMemoryRepository<T: Entity> {
    buffer: RefCell<Vec<EntityRef<T>>>,
    locator: Weak<RepositoryRegistry>,
    disposed: Cell<bool>,
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            buffer: RefCell::new(Vec::new()),
            locator: Weak::new(),
            disposed: Cell::new(false),
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    /// Creates a standalone repository. Cascades reach only `T` itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository that cascades through `registry`.
    pub fn with_locator(registry: &Rc<RepositoryRegistry>) -> Self {
        Self {
            locator: Rc::downgrade(registry),
            ..Self::default()
        }
    }

    /// Creates a repository bound to `registry` and registers it for `T`.
    pub fn register(registry: &Rc<RepositoryRegistry>) -> RepoResult<Rc<Self>> {
        let repository = Rc::new(Self::with_locator(registry));
        registry.register::<T, Self>(Rc::clone(&repository))?;
        Ok(repository)
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }

    /// Whether this exact instance is stored.
    pub fn contains(&self, entity: &EntityRef<T>) -> bool {
        self.buffer
            .borrow()
            .iter()
            .any(|stored| Rc::ptr_eq(stored, entity))
    }

    /// Empties the buffer. Test-support operation.
    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }

    fn ensure_open(&self) -> RepoResult<()> {
        if self.disposed.get() {
            return Err(RepoError::Disposed(T::schema().name()));
        }
        Ok(())
    }

    fn next_id(&self) -> RepoResult<EntityId> {
        let mut max_id: Option<EntityId> = None;
        for stored in self.buffer.borrow().iter() {
            if let Some(id) = read_id(stored)? {
                max_id = Some(max_id.map_or(id, |current| current.max(id)));
            }
        }
        Ok(max_id.map_or(1, |id| id + 1))
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn all_entities(&self) -> RepoResult<Query<T>> {
        self.ensure_open()?;
        Ok(Query::new(self.buffer.borrow().clone()))
    }

    fn save_in(&self, entity: &EntityRef<T>, transaction: &mut SaveTransaction) -> RepoResult<()> {
        self.ensure_open()?;
        let schema = T::schema();

        if !transaction.enter(&erase(entity)) {
            trace!(
                "event=entity_save module=repo.memory status=skip entity={} reason=in_progress",
                schema.name()
            );
            return Ok(());
        }

        if !self.contains(entity) {
            let assigned = if schema.has_identity() {
                let id = self.next_id()?;
                let mut guard = entity
                    .try_borrow_mut()
                    .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
                schema.assign_id(&mut guard, id)?;
                Some(id)
            } else {
                None
            };
            self.buffer.borrow_mut().push(Rc::clone(entity));
            debug!(
                "event=entity_insert module=repo.memory status=ok entity={} id={:?} count={}",
                schema.name(),
                assigned,
                self.len()
            );
        }

        for related in collect_associations(entity)? {
            cascade_save::<T, Self>(self, &self.locator, &related, transaction)?;
        }

        Ok(())
    }

    fn remove(&self, entity: &EntityRef<T>) -> RepoResult<()> {
        self.ensure_open()?;
        let mut buffer = self.buffer.borrow_mut();
        if let Some(position) = buffer.iter().position(|stored| Rc::ptr_eq(stored, entity)) {
            buffer.remove(position);
            debug!(
                "event=entity_remove module=repo.memory status=ok entity={} count={}",
                T::schema().name(),
                buffer.len()
            );
        }
        Ok(())
    }

    fn update(&self, entity: &EntityRef<T>) -> RepoResult<()> {
        self.ensure_open()?;
        let schema = T::schema();
        if !schema.has_identity() {
            return Err(RepoError::MissingIdentity(schema.name()));
        }

        let id = read_id(entity)?;
        let not_found = || RepoError::NotFound {
            entity: schema.name(),
            id,
        };
        let id = id.ok_or_else(not_found)?;
        let stored = self.all_entities()?.find_by_id(id).ok_or_else(not_found)?;

        if Rc::ptr_eq(&stored, entity) {
            return Ok(());
        }

        let source = stored
            .try_borrow()
            .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
        let mut target = entity
            .try_borrow_mut()
            .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
        schema.copy_fields(&source, &mut target)?;
        Ok(())
    }

    fn dispose(&self) -> RepoResult<()> {
        if self.disposed.replace(true) {
            return Ok(());
        }
        self.buffer.borrow_mut().clear();
        debug!(
            "event=repository_dispose module=repo.memory status=ok entity={}",
            T::schema().name()
        );
        Ok(())
    }
}
