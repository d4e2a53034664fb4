//! SQLite-backed repository over the shared `entity_rows` table.
//!
//! # Responsibility
//! - Persist entities as JSON field bodies keyed by `(entity_type, id)`.
//! - Track attached instances so one row maps to one live handle.
//! - Insert detached instances; reject a detached instance whose id already
//!   has a row or an attached handle.
//! - Resolve stored association ids back into entity handles.
//!
//! # Invariants
//! - Only entity types with an identity field can be stored here.
//! - The connection must be migrated to the latest schema version.
//! - Associations are persisted by id; an id with no resolvable target reads
//!   as null (to-one) or is dropped (to-many).
//! - An instance is attached before its associations are hydrated, so cyclic
//!   graphs load without unbounded recursion.

use crate::db::migrations::{current_version, latest_version};
use crate::db::DbError;
use crate::model::entity::{
    erase, new_ref, AnyEntityRef, Entity, EntityId, EntityRef, EntityType, UNASSIGNED_ID,
};
use crate::model::schema::{FieldDef, FieldError};
use crate::model::value::{FieldKind, Value};
use crate::repo::registry::RepositoryRegistry;
use crate::repo::{
    cascade_save, collect_associations, read_id, Query, RepoError, RepoResult, Repository,
    SaveTransaction,
};
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

const UPSERT_ROW_SQL: &str = "INSERT INTO entity_rows (entity_type, id, body)
VALUES (?1, ?2, ?3)
ON CONFLICT(entity_type, id) DO UPDATE SET
    body = excluded.body,
    updated_at = (strftime('%s', 'now') * 1000);";

/// Repository persisting one entity type into SQLite.
pub struct SqliteRepository<T: Entity> {
    conn: RefCell<Option<Rc<Connection>>>,
    storage_key: String,
    attached: RefCell<HashMap<EntityId, EntityRef<T>>>,
    locator: Weak<RepositoryRegistry>,
}

impl<T: Entity> SqliteRepository<T> {
    /// Creates a standalone repository. Associations to other entity types
    /// are neither cascaded nor resolved.
    pub fn try_new(conn: Rc<Connection>) -> RepoResult<Self> {
        Self::build(conn, Weak::new())
    }

    /// Creates a repository that cascades and resolves through `registry`.
    pub fn with_locator(
        conn: Rc<Connection>,
        registry: &Rc<RepositoryRegistry>,
    ) -> RepoResult<Self> {
        Self::build(conn, Rc::downgrade(registry))
    }

    /// Creates a repository bound to `registry` and registers it for `T`.
    pub fn register(
        conn: Rc<Connection>,
        registry: &Rc<RepositoryRegistry>,
    ) -> RepoResult<Rc<Self>> {
        let repository = Rc::new(Self::with_locator(conn, registry)?);
        registry.register::<T, Self>(Rc::clone(&repository))?;
        Ok(repository)
    }

    fn build(conn: Rc<Connection>, locator: Weak<RepositoryRegistry>) -> RepoResult<Self> {
        let schema = T::schema();
        if !schema.has_identity() {
            return Err(RepoError::InvalidArgument(format!(
                "`{}` declares no identity field and cannot be stored in SQLite",
                schema.name()
            )));
        }

        let db_version = current_version(&conn)?;
        let latest = latest_version();
        if db_version > latest {
            return Err(DbError::UnsupportedSchemaVersion {
                db_version,
                latest_supported: latest,
            }
            .into());
        }
        if db_version < latest {
            return Err(DbError::MigrationsPending { db_version, latest }.into());
        }

        Ok(Self {
            conn: RefCell::new(Some(conn)),
            storage_key: EntityType::of::<T>().storage_key(),
            attached: RefCell::new(HashMap::new()),
            locator,
        })
    }

    /// Number of persisted rows for `T`.
    pub fn count(&self) -> RepoResult<usize> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entity_rows WHERE entity_type = ?1;",
            params![self.storage_key],
            |row| row.get::<_, i64>(0),
        )?;
        usize::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }

    /// Whether this exact instance is the attached handle for its id.
    pub fn is_attached(&self, entity: &EntityRef<T>) -> bool {
        self.attached
            .borrow()
            .values()
            .any(|attached| Rc::ptr_eq(attached, entity))
    }

    fn connection(&self) -> RepoResult<Rc<Connection>> {
        self.conn
            .borrow()
            .as_ref()
            .map(Rc::clone)
            .ok_or_else(|| RepoError::Disposed(T::schema().name()))
    }

    fn next_id(&self, conn: &Connection) -> RepoResult<EntityId> {
        let stored: Option<EntityId> = conn.query_row(
            "SELECT MAX(id) FROM entity_rows WHERE entity_type = ?1;",
            params![self.storage_key],
            |row| row.get(0),
        )?;
        let attached = self.attached.borrow().keys().copied().max();
        Ok(stored.max(attached).map_or(1, |id| id + 1))
    }

    fn load_body(&self, conn: &Connection, id: EntityId) -> RepoResult<Option<String>> {
        let body = conn
            .query_row(
                "SELECT body FROM entity_rows WHERE entity_type = ?1 AND id = ?2;",
                params![self.storage_key, id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(body)
    }

    /// Rejects a save of `entity` under an id that another handle owns,
    /// either attached here or stored without being loaded.
    fn check_owner(
        &self,
        conn: &Connection,
        id: EntityId,
        entity: &EntityRef<T>,
    ) -> RepoResult<()> {
        let same_handle = self
            .attached
            .borrow()
            .get(&id)
            .map(|attached| Rc::ptr_eq(attached, entity));
        let conflict = match same_handle {
            Some(same) => !same,
            None => self.load_body(conn, id)?.is_some(),
        };
        if conflict {
            return Err(RepoError::InvalidArgument(format!(
                "`{}` id {id} is owned by another instance; load it with `find` before saving",
                T::schema().name()
            )));
        }
        Ok(())
    }

    /// Writes the decoded row body into `entity`.
    fn hydrate(&self, entity: &EntityRef<T>, body: &str) -> RepoResult<()> {
        let schema = T::schema();
        let values = self.decode_body(body)?;
        let mut guard = entity
            .try_borrow_mut()
            .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;

        for (field, value) in values {
            let clearing_reference = matches!(field.kind(), FieldKind::ToOne(_)) && value.is_null();
            match field.write(schema.name(), &mut guard, value) {
                Ok(()) => {}
                // Non-optional references keep their current target.
                Err(FieldError::TypeMismatch { .. }) if clearing_reference => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn decode_body(&self, body: &str) -> RepoResult<Vec<(&'static FieldDef<T>, Value)>> {
        let schema = T::schema();
        let body: Map<String, JsonValue> = serde_json::from_str(body).map_err(|err| {
            RepoError::InvalidData(format!("`{}` row body is not an object: {err}", schema.name()))
        })?;
        let identity = schema.identity().map(FieldDef::name);

        let mut values = Vec::with_capacity(body.len());
        for field in schema.fields() {
            if Some(field.name()) == identity {
                continue;
            }
            let Some(json) = body.get(field.name()) else {
                continue;
            };

            let value = match field.kind() {
                FieldKind::Scalar => scalar_from_json(field.name(), json)?,
                FieldKind::ToOne(related_type) => match id_from_json(field.name(), json)? {
                    Some(id) => self
                        .resolve(related_type, id)?
                        .map_or(Value::Null, Value::Entity),
                    None => Value::Null,
                },
                FieldKind::ToMany(related_type) => {
                    let ids = json.as_array().ok_or_else(|| {
                        RepoError::InvalidData(format!(
                            "field `{}` must hold an id array",
                            field.name()
                        ))
                    })?;
                    let mut entities = Vec::with_capacity(ids.len());
                    for id in ids {
                        if let Some(id) = id_from_json(field.name(), id)? {
                            entities.extend(self.resolve(related_type, id)?);
                        }
                    }
                    Value::Entities(entities)
                }
            };
            values.push((field, value));
        }
        Ok(values)
    }

    fn encode_body(&self, entity: &EntityRef<T>) -> RepoResult<String> {
        let schema = T::schema();
        let guard = entity
            .try_borrow()
            .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
        let identity = schema.identity().map(FieldDef::name);

        let mut body = Map::new();
        for field in schema.fields() {
            if Some(field.name()) == identity {
                continue;
            }
            let json = match field.read(&guard) {
                Value::Null => JsonValue::Null,
                Value::Bool(value) => JsonValue::Bool(value),
                Value::Integer(value) => JsonValue::from(value),
                Value::Real(value) => JsonValue::from(value),
                Value::Text(value) => JsonValue::String(value),
                Value::Entity(target) => id_to_json(target.id()?),
                Value::Entities(targets) => {
                    let mut ids = Vec::with_capacity(targets.len());
                    for target in &targets {
                        let id = id_to_json(target.id()?);
                        if !id.is_null() {
                            ids.push(id);
                        }
                    }
                    JsonValue::Array(ids)
                }
            };
            body.insert(field.name().to_string(), json);
        }
        Ok(JsonValue::Object(body).to_string())
    }

    fn resolve(&self, related_type: EntityType, id: EntityId) -> RepoResult<Option<AnyEntityRef>> {
        if related_type == EntityType::of::<T>() {
            return Ok(self.find(id)?.as_ref().map(erase));
        }

        match self
            .locator
            .upgrade()
            .and_then(|registry| registry.erased(related_type))
        {
            Some(repository) => repository.find_erased(id),
            None => {
                debug!(
                    "event=association_resolve module=repo.sqlite status=skip owner={} related={} id={} reason=not_registered",
                    T::schema().name(),
                    related_type.name(),
                    id
                );
                Ok(None)
            }
        }
    }
}

impl<T: Entity> Repository<T> for SqliteRepository<T> {
    fn all_entities(&self) -> RepoResult<Query<T>> {
        let conn = self.connection()?;
        let ids = {
            let mut stmt =
                conn.prepare("SELECT id FROM entity_rows WHERE entity_type = ?1 ORDER BY id ASC;")?;
            let rows = stmt.query_map(params![self.storage_key], |row| row.get::<_, EntityId>(0))?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            entities.extend(self.find(id)?);
        }
        Ok(Query::new(entities))
    }

    fn find(&self, id: EntityId) -> RepoResult<Option<EntityRef<T>>> {
        let conn = self.connection()?;
        if let Some(attached) = self.attached.borrow().get(&id) {
            return Ok(Some(Rc::clone(attached)));
        }

        let Some(body) = self.load_body(&conn, id)? else {
            return Ok(None);
        };

        let schema = T::schema();
        let mut blank = T::default();
        schema.assign_id(&mut blank, id)?;
        let entity = new_ref(blank);
        self.attached.borrow_mut().insert(id, Rc::clone(&entity));

        if let Err(err) = self.hydrate(&entity, &body) {
            self.attached.borrow_mut().remove(&id);
            return Err(err);
        }
        trace!(
            "event=entity_load module=repo.sqlite status=ok entity={} id={}",
            schema.name(),
            id
        );
        Ok(Some(entity))
    }

    fn save_in(&self, entity: &EntityRef<T>, transaction: &mut SaveTransaction) -> RepoResult<()> {
        let conn = self.connection()?;
        let schema = T::schema();

        if !transaction.enter(&erase(entity)) {
            trace!(
                "event=entity_save module=repo.sqlite status=skip entity={} reason=in_progress",
                schema.name()
            );
            return Ok(());
        }

        let id = match read_id(entity)? {
            Some(id) if id != UNASSIGNED_ID => {
                self.check_owner(&conn, id, entity)?;
                id
            }
            _ => {
                let id = self.next_id(&conn)?;
                let mut guard = entity
                    .try_borrow_mut()
                    .map_err(|_| RepoError::EntityBorrowed(schema.name()))?;
                schema.assign_id(&mut guard, id)?;
                id
            }
        };
        self.attached.borrow_mut().insert(id, Rc::clone(entity));

        for related in collect_associations(entity)? {
            cascade_save::<T, Self>(self, &self.locator, &related, transaction)?;
        }

        let body = self.encode_body(entity)?;
        conn.execute(UPSERT_ROW_SQL, params![self.storage_key, id, body])?;
        debug!(
            "event=entity_save module=repo.sqlite status=ok entity={} id={}",
            schema.name(),
            id
        );
        Ok(())
    }

    fn remove(&self, entity: &EntityRef<T>) -> RepoResult<()> {
        let conn = self.connection()?;
        let Some(id) = read_id(entity)? else {
            return Ok(());
        };

        let attached = self
            .attached
            .borrow()
            .get(&id)
            .is_some_and(|attached| Rc::ptr_eq(attached, entity));
        if !attached {
            return Ok(());
        }

        conn.execute(
            "DELETE FROM entity_rows WHERE entity_type = ?1 AND id = ?2;",
            params![self.storage_key, id],
        )?;
        self.attached.borrow_mut().remove(&id);
        debug!(
            "event=entity_remove module=repo.sqlite status=ok entity={} id={}",
            T::schema().name(),
            id
        );
        Ok(())
    }

    fn update(&self, entity: &EntityRef<T>) -> RepoResult<()> {
        let conn = self.connection()?;
        let schema = T::schema();

        let id = read_id(entity)?.filter(|id| *id != UNASSIGNED_ID);
        let not_found = || RepoError::NotFound {
            entity: schema.name(),
            id,
        };
        let id = id.ok_or_else(not_found)?;
        let body = self.load_body(&conn, id)?.ok_or_else(not_found)?;

        self.hydrate(entity, &body)?;
        debug!(
            "event=entity_update module=repo.sqlite status=ok entity={} id={}",
            schema.name(),
            id
        );
        Ok(())
    }

    fn dispose(&self) -> RepoResult<()> {
        if self.conn.borrow_mut().take().is_none() {
            return Ok(());
        }
        self.attached.borrow_mut().clear();
        debug!(
            "event=repository_dispose module=repo.sqlite status=ok entity={}",
            T::schema().name()
        );
        Ok(())
    }
}

fn scalar_from_json(field: &str, json: &JsonValue) -> RepoResult<Value> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(value) => Ok(Value::Bool(*value)),
        JsonValue::Number(number) => number
            .as_i64()
            .map(Value::Integer)
            .or_else(|| number.as_f64().map(Value::Real))
            .ok_or_else(|| RepoError::InvalidData(format!("field `{field}` holds {number}"))),
        JsonValue::String(value) => Ok(Value::Text(value.clone())),
        other => Err(RepoError::InvalidData(format!(
            "field `{field}` holds non-scalar {other}"
        ))),
    }
}

fn id_from_json(field: &str, json: &JsonValue) -> RepoResult<Option<EntityId>> {
    match json {
        JsonValue::Null => Ok(None),
        other => other.as_i64().map(Some).ok_or_else(|| {
            RepoError::InvalidData(format!("field `{field}` holds invalid reference {other}"))
        }),
    }
}

fn id_to_json(id: Option<EntityId>) -> JsonValue {
    match id {
        Some(id) if id != UNASSIGNED_ID => JsonValue::from(id),
        _ => JsonValue::Null,
    }
}
